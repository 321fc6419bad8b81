//! Collaborator interfaces.
//!
//! The synchronizer never talks to a concrete database, feed or bucket; it
//! goes through these traits. Rows cross the boundary as JSON objects with
//! `created_at`/`updated_at` normalised to epoch milliseconds.

use arthub_engine::{Entity, RawChange, Scope, SortOrder, UserId, ViewSpec};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreResult;

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilter {
    pub column: String,
    pub value: String,
}

impl FeedFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// The filter selecting `scope` of `entity`, `None` for the whole table.
    pub fn for_scope(entity: Entity, scope: &Scope) -> Option<Self> {
        scope.key().map(|key| Self::eq(entity.scope_column(), key.clone()))
    }

    /// Whether a row passes the filter. Values are compared as text.
    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Number(n)) => n.to_string() == self.value,
            Some(Value::Bool(b)) => b.to_string() == self.value,
            _ => false,
        }
    }
}

/// A bulk read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub entity: Entity,
    pub filter: Option<FeedFilter>,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

impl Query {
    /// Every row of `entity`, in its default order.
    pub fn all(entity: Entity) -> Self {
        Self {
            entity,
            filter: None,
            order: entity.default_order(),
            limit: None,
        }
    }

    /// The initial fetch of a view over `scope`.
    pub fn for_view(spec: &ViewSpec, scope: &Scope) -> Self {
        Self {
            entity: spec.entity,
            filter: FeedFilter::for_scope(spec.entity, scope),
            order: spec.order,
            limit: spec.limit,
        }
    }
}

/// Stream of changes for one subscription. The stream ending means the
/// connection dropped.
pub type ChangeStream = BoxStream<'static, RawChange>;

/// The authoritative relational store.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Insert a row; the store assigns `id` and `created_at` and returns the
    /// stored row.
    async fn insert(&self, entity: Entity, row: Value) -> StoreResult<Value>;

    /// Merge `patch` into the row with `id` and return the stored row.
    async fn update(&self, entity: Entity, id: &str, patch: Value) -> StoreResult<Value>;

    async fn delete(&self, entity: Entity, id: &str) -> StoreResult<()>;

    async fn query(&self, query: &Query) -> StoreResult<Vec<Value>>;
}

/// Change notifications for one table, optionally filtered.
///
/// Deletes are delivered regardless of the filter: their old row may carry
/// only the primary key.
#[async_trait]
pub trait ChangeFeedService: Send + Sync {
    async fn subscribe(&self, entity: Entity, filter: Option<FeedFilter>)
        -> StoreResult<ChangeStream>;
}

/// Blob storage for artwork images.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` and return the public URL.
    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> StoreResult<String>;
}

/// Source of the signed-in user.
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<UserId>;
}

/// An identity fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<UserId>);

impl StaticIdentity {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self(Some(user_id.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        self.0.clone()
    }
}
