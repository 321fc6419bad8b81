//! Change feed events.
//!
//! The feed service delivers loosely shaped `RawChange` payloads; they are
//! converted into a typed [`FeedEvent`] before they reach the reconciler.

use crate::{error::Result, Entity, Error, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of change reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change notification as delivered by the feed service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChange {
    /// Table the change happened on
    pub table: String,
    pub event_type: ChangeKind,
    /// Row after the change (insert/update)
    #[serde(default, rename = "new")]
    pub new_row: Option<Value>,
    /// Row before the change (update/delete)
    #[serde(default, rename = "old")]
    pub old_row: Option<Value>,
}

impl RawChange {
    pub fn insert(entity: Entity, row: Value) -> Self {
        Self {
            table: entity.table().to_string(),
            event_type: ChangeKind::Insert,
            new_row: Some(row),
            old_row: None,
        }
    }

    pub fn update(entity: Entity, old: Value, new: Value) -> Self {
        Self {
            table: entity.table().to_string(),
            event_type: ChangeKind::Update,
            new_row: Some(new),
            old_row: Some(old),
        }
    }

    pub fn delete(entity: Entity, old: Value) -> Self {
        Self {
            table: entity.table().to_string(),
            event_type: ChangeKind::Delete,
            new_row: None,
            old_row: Some(old),
        }
    }

    /// The row that identifies the change: `new` for inserts and updates,
    /// `old` for deletes.
    pub fn row(&self) -> Option<&Value> {
        match self.event_type {
            ChangeKind::Insert | ChangeKind::Update => self.new_row.as_ref(),
            ChangeKind::Delete => self.old_row.as_ref(),
        }
    }
}

/// A typed feed event for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "lowercase")]
pub enum FeedEvent {
    Insert(Record),
    Update(Record),
    Delete(Record),
}

impl FeedEvent {
    /// Convert a raw change for `entity`.
    pub fn from_raw(entity: Entity, raw: &RawChange) -> Result<Self> {
        if raw.table != entity.table() {
            return Err(Error::InvalidRow(format!(
                "change for table '{}' delivered to {} feed",
                raw.table, entity
            )));
        }

        let row = raw.row().ok_or_else(|| {
            Error::InvalidRow(format!("{:?} change without a row", raw.event_type))
        })?;

        Ok(match raw.event_type {
            ChangeKind::Insert => FeedEvent::Insert(Record::from_row(entity, row)?),
            ChangeKind::Update => FeedEvent::Update(Record::from_row(entity, row)?),
            ChangeKind::Delete => FeedEvent::Delete(Record::from_old_row(entity, row)?),
        })
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            FeedEvent::Insert(_) => ChangeKind::Insert,
            FeedEvent::Update(_) => ChangeKind::Update,
            FeedEvent::Delete(_) => ChangeKind::Delete,
        }
    }

    pub fn record(&self) -> &Record {
        match self {
            FeedEvent::Insert(r) | FeedEvent::Update(r) | FeedEvent::Delete(r) => r,
        }
    }
}
