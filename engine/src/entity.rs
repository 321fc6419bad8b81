//! Entities, scopes and ordering.
//!
//! An entity names a table in the authoritative store together with the column
//! that scopes its live views and the order its records are displayed in.

use crate::{Record, ScopeKey};
use serde::{Deserialize, Serialize};

/// Column holding the author of every row.
pub const AUTHOR_COLUMN: &str = "user_id";

/// Column the store echoes back so a feed event can be matched with the
/// optimistic placeholder that caused it.
pub const CLIENT_REF_COLUMN: &str = "client_ref";

/// Display order of a live collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first (chat style)
    Ascending,
    /// Newest first
    Descending,
}

/// Entities that can be mounted as live views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Artworks,
    Comments,
    Likes,
    Messages,
    OpenCallSubmissions,
}

impl Entity {
    /// All entities, in table-name order.
    pub const ALL: [Entity; 5] = [
        Entity::Artworks,
        Entity::Comments,
        Entity::Likes,
        Entity::Messages,
        Entity::OpenCallSubmissions,
    ];

    /// Table name in the authoritative store.
    pub fn table(&self) -> &'static str {
        match self {
            Entity::Artworks => "artworks",
            Entity::Comments => "comments",
            Entity::Likes => "likes",
            Entity::Messages => "messages",
            Entity::OpenCallSubmissions => "open_call_submissions",
        }
    }

    /// Column used to scope feeds and collections.
    pub fn scope_column(&self) -> &'static str {
        match self {
            Entity::Artworks => "user_id",
            Entity::Comments | Entity::Likes => "artwork_id",
            Entity::Messages => "conversation_id",
            Entity::OpenCallSubmissions => "open_call_id",
        }
    }

    /// Default display order.
    pub fn default_order(&self) -> SortOrder {
        match self {
            Entity::Comments | Entity::Messages => SortOrder::Ascending,
            Entity::Artworks | Entity::Likes | Entity::OpenCallSubmissions => {
                SortOrder::Descending
            }
        }
    }

    /// Look up an entity by table name.
    pub fn from_table(table: &str) -> Option<Entity> {
        Entity::ALL.into_iter().find(|e| e.table() == table)
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

/// The filter narrowing a feed subscription and its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "key", rename_all = "lowercase")]
pub enum Scope {
    /// Every row of the entity
    All,
    /// Rows whose scope column equals the key
    Parent(ScopeKey),
}

impl Scope {
    /// Scope to a single parent key.
    pub fn parent(key: impl Into<ScopeKey>) -> Self {
        Scope::Parent(key.into())
    }

    /// The parent key, if this scope has one.
    pub fn key(&self) -> Option<&ScopeKey> {
        match self {
            Scope::All => None,
            Scope::Parent(key) => Some(key),
        }
    }

    /// Whether a record belongs to this scope.
    ///
    /// Records without a parent key (e.g. a delete carrying only an id) are
    /// admitted; removing an absent id is a no-op downstream.
    pub fn admits(&self, record: &Record) -> bool {
        match (self, &record.parent_key) {
            (Scope::All, _) => true,
            (Scope::Parent(_), None) => true,
            (Scope::Parent(key), Some(parent)) => key == parent,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::All => f.write_str("*"),
            Scope::Parent(key) => f.write_str(key),
        }
    }
}
