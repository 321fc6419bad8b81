//! Messages exchanged between view handles and their actor.

use std::collections::BTreeMap;

use arthub_engine::{
    CounterKey, Effect, LiveView, LocalId, Record, RecordId, Scope, ToggleKey,
    ToggleOutcome,
};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Result, StoreError, StoreResult, SyncError};
use crate::feed::FeedSignal;

/// The authoritative write that backs an optimistic effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Insert the effect's placeholder, client reference included
    InsertPlaceholder,
    Insert { row: Value },
    Update { id: RecordId, patch: Value },
    Delete { id: RecordId },
}

/// An optimistic effect together with its write.
#[derive(Debug, Clone, PartialEq)]
pub struct Planned {
    pub effect: Effect,
    pub write: Write,
    /// Set for toggle-style edits, which never stack
    pub toggle: Option<ToggleKey>,
}

impl Planned {
    pub fn new(effect: Effect, write: Write) -> Self {
        Self {
            effect,
            write,
            toggle: None,
        }
    }

    /// Show `record` immediately and insert it.
    pub fn insert(record: Record) -> Self {
        Self::new(Effect::Insert { record }, Write::InsertPlaceholder)
    }

    /// Show `current` with `patch` merged and send the patch.
    pub fn update(current: &Record, patch: Value) -> Result<Self> {
        let id = current.id.clone().ok_or(arthub_engine::Error::MissingId)?;
        let mut record = current.clone();
        record.apply_patch(&patch);
        Ok(Self::new(
            Effect::Update { record },
            Write::Update { id, patch },
        ))
    }

    pub fn delete(id: impl Into<RecordId>) -> Self {
        let id = id.into();
        Self::new(Effect::Delete { id: id.clone() }, Write::Delete { id })
    }

    pub fn toggled(mut self, key: ToggleKey) -> Self {
        self.toggle = Some(key);
        self
    }
}

/// Decides what to apply, given the view state at the moment the actor
/// handles the request.
pub(crate) type Plan = Box<dyn FnOnce(&LiveView) -> Result<Vec<Planned>> + Send>;

pub(crate) enum Command {
    Feed {
        generation: u64,
        signal: FeedSignal,
    },
    FetchFinished {
        fetch: u64,
        result: StoreResult<Vec<Value>>,
    },
    Apply {
        plan: Plan,
        reply: oneshot::Sender<Result<Vec<ToggleOutcome>>>,
    },
    WriteFinished {
        local_id: LocalId,
        result: Result<Option<Value>>,
    },
    Rescope {
        scope: Scope,
    },
    Refetch,
    Unmount {
        reply: oneshot::Sender<()>,
    },
}

/// Loading state of a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewStatus {
    Loading,
    Ready,
    /// The last fetch failed; the view shows whatever it held before
    Failed(String),
}

/// What presentation code renders.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub status: ViewStatus,
    pub scope: Scope,
    pub records: Vec<Record>,
    pub counters: BTreeMap<CounterKey, i64>,
    /// Optimistic edits awaiting their write
    pub pending: usize,
}

impl ViewSnapshot {
    pub(crate) fn loading(scope: Scope) -> Self {
        Self {
            status: ViewStatus::Loading,
            scope,
            records: Vec::new(),
            counters: BTreeMap::new(),
            pending: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ViewStatus::Ready
    }

    pub fn counter(&self, key: &str) -> i64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id.as_deref() == Some(id))
    }

    /// Counter keys ranked by count, e.g. the most liked artworks of an
    /// all-likes view.
    pub fn popular(&self, limit: usize) -> Vec<(CounterKey, i64)> {
        arthub_engine::rank_counts(self.counters.clone(), limit)
    }
}

/// User-visible notices.
#[derive(Debug, Clone)]
pub enum ViewNotice {
    /// A write failed and its optimistic edit was rolled back
    WriteFailed { local_id: LocalId, error: SyncError },
    FetchFailed { error: StoreError },
}
