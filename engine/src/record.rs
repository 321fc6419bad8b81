//! Record types and row conversion.

use crate::{
    entity::{AUTHOR_COLUMN, CLIENT_REF_COLUMN},
    error::Result,
    Entity, Error, LocalId, RecordId, ScopeKey, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where the current value of a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Optimistic placeholder, not yet acknowledged by the store
    Local,
    /// Row returned by the store or delivered by the feed
    Remote,
}

/// A domain row held in a live collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Server-assigned key; `None` on an optimistic placeholder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    /// Client-generated key carried until confirmation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalId>,
    /// Value of the entity's scope column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<ScopeKey>,
    /// Author of the row
    pub author_id: UserId,
    /// Creation time in milliseconds, used for ordering
    pub created_at: Timestamp,
    /// Last modification time in milliseconds, if the entity tracks one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Entity-specific columns
    pub payload: Value,
}

impl Record {
    /// Create a record as the store would return it.
    pub fn server(
        id: impl Into<RecordId>,
        parent_key: Option<&str>,
        author_id: impl Into<UserId>,
        created_at: Timestamp,
        payload: Value,
    ) -> Self {
        Self {
            id: Some(id.into()),
            local_id: None,
            parent_key: parent_key.map(str::to_string),
            author_id: author_id.into(),
            created_at,
            updated_at: None,
            payload,
        }
    }

    /// Create an optimistic placeholder. The local id is assigned when the
    /// edit is applied.
    pub fn placeholder(
        parent_key: Option<&str>,
        author_id: impl Into<UserId>,
        created_at: Timestamp,
        payload: Value,
    ) -> Self {
        Self {
            id: None,
            local_id: None,
            parent_key: parent_key.map(str::to_string),
            author_id: author_id.into(),
            created_at,
            updated_at: None,
            payload,
        }
    }

    /// A record known only by its id (e.g. the old row of a delete).
    pub fn key_only(id: impl Into<RecordId>) -> Self {
        Self {
            id: Some(id.into()),
            local_id: None,
            parent_key: None,
            author_id: UserId::new(),
            created_at: 0,
            updated_at: None,
            payload: Value::Object(Map::new()),
        }
    }

    /// Set the updated-at timestamp.
    pub fn with_updated_at(mut self, updated_at: Timestamp) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Set the client reference.
    pub fn with_local_id(mut self, local_id: impl Into<LocalId>) -> Self {
        self.local_id = Some(local_id.into());
        self
    }

    /// Remote once the server assigned an id, local before.
    pub fn origin(&self) -> Origin {
        if self.id.is_some() {
            Origin::Remote
        } else {
            Origin::Local
        }
    }

    /// Whether two records denote the same row.
    ///
    /// Server ids decide when both sides carry one; otherwise the client
    /// reference does.
    pub fn same_key(&self, other: &Record) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => matches!(
                (&self.local_id, &other.local_id),
                (Some(a), Some(b)) if a == b
            ),
        }
    }

    /// Key used to break ties between records created in the same millisecond.
    pub fn sort_id(&self) -> &str {
        self.id
            .as_deref()
            .or(self.local_id.as_deref())
            .unwrap_or_default()
    }

    /// Read a payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Merge a JSON object patch into the payload.
    pub fn apply_patch(&mut self, patch: &Value) {
        if let (Some(target), Some(patch)) = (self.payload.as_object_mut(), patch.as_object()) {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    /// Build a record from a store row.
    ///
    /// Rows are JSON objects with `created_at` already normalised to
    /// milliseconds.
    pub fn from_row(entity: Entity, row: &Value) -> Result<Self> {
        let obj = row
            .as_object()
            .ok_or_else(|| Error::InvalidRow(format!("{} row is not an object", entity)))?;

        let missing = |column: &str| Error::MissingColumn {
            entity: entity.table().to_string(),
            column: column.to_string(),
        };

        let id = obj.get("id").and_then(as_key).ok_or_else(|| missing("id"))?;
        let author_id = obj
            .get(AUTHOR_COLUMN)
            .and_then(as_key)
            .ok_or_else(|| missing(AUTHOR_COLUMN))?;
        let created_at = obj
            .get("created_at")
            .and_then(Value::as_i64)
            .ok_or_else(|| missing("created_at"))?;
        let updated_at = obj.get("updated_at").and_then(Value::as_i64);
        let parent_key = obj.get(entity.scope_column()).and_then(as_key);
        let local_id = obj.get(CLIENT_REF_COLUMN).and_then(as_key);

        let reserved = [
            "id",
            AUTHOR_COLUMN,
            "created_at",
            "updated_at",
            CLIENT_REF_COLUMN,
            entity.scope_column(),
        ];
        let payload: Map<String, Value> = obj
            .iter()
            .filter(|(k, _)| !reserved.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            id: Some(id),
            local_id,
            parent_key,
            author_id,
            created_at,
            updated_at,
            payload: Value::Object(payload),
        })
    }

    /// Build a record from the old row of a delete, which may carry only the
    /// primary key.
    pub fn from_old_row(entity: Entity, row: &Value) -> Result<Self> {
        match Self::from_row(entity, row) {
            Ok(record) => Ok(record),
            Err(err) => row
                .get("id")
                .and_then(as_key)
                .map(Record::key_only)
                .ok_or(err),
        }
    }

    /// Row to send to the store for an insert. The store assigns `id` and
    /// `created_at`.
    pub fn insert_row(&self, entity: Entity) -> Value {
        let mut row = self.payload.as_object().cloned().unwrap_or_default();
        row.insert(AUTHOR_COLUMN.into(), Value::String(self.author_id.clone()));
        if let Some(parent) = &self.parent_key {
            row.insert(entity.scope_column().into(), Value::String(parent.clone()));
        }
        if let Some(local_id) = &self.local_id {
            row.insert(CLIENT_REF_COLUMN.into(), Value::String(local_id.clone()));
        }
        Value::Object(row)
    }

    /// Full row representation, as the store would hold it.
    pub fn to_row(&self, entity: Entity) -> Value {
        let mut row = match self.insert_row(entity) {
            Value::Object(row) => row,
            _ => Map::new(),
        };
        if let Some(id) = &self.id {
            row.insert("id".into(), Value::String(id.clone()));
        }
        row.insert("created_at".into(), Value::from(self.created_at));
        if let Some(updated_at) = self.updated_at {
            row.insert("updated_at".into(), Value::from(updated_at));
        }
        Value::Object(row)
    }
}

fn as_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
