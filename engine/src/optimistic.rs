//! Optimistic edits.
//!
//! An edit is applied to the collection immediately and tracked as pending
//! until the authoritative write confirms it or fails. Every edit records the
//! exact inverse of what it did so a rollback restores the prior state.
//!
//! ```text
//! apply ──► Pending ──confirm──► Confirmed
//!              │
//!              └──rollback──► RolledBack
//! ```

use crate::{
    collection::Upsert,
    error::Result,
    reconcile::{is_newer, is_stale},
    CounterCache, CounterKey, Error, LiveCollection, LocalId,
    NodeId, Record, RecordId, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The local change an edit makes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Effect {
    /// Insert a placeholder record
    Insert { record: Record },
    /// Replace a record (matched by server id) with a new value
    Update { record: Record },
    /// Remove a record by server id
    Delete { id: RecordId },
    /// Adjust a counter that has no backing records
    AdjustCounter { key: CounterKey, delta: i64 },
}

/// Lifecycle of an optimistic edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EditStatus {
    Pending,
    Confirmed,
    RolledBack,
}

/// How to revert an applied effect.
#[derive(Debug, Clone, PartialEq)]
enum Undo {
    RemovePlaceholder(LocalId),
    Restore(Record),
    Revert { previous: Record, applied: Record },
    Counter { key: CounterKey, delta: i64 },
}

/// Identifies a toggle-style target, e.g. one user's like on one artwork.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleKey {
    pub user_id: UserId,
    pub target: String,
}

impl ToggleKey {
    pub fn new(user_id: impl Into<UserId>, target: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            target: target.into(),
        }
    }
}

/// Result of a toggle request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "localId", rename_all = "camelCase")]
pub enum ToggleOutcome {
    /// A new edit was applied
    Applied(LocalId),
    /// An edit for the same target is still pending; nothing changed
    Coalesced(LocalId),
}

impl ToggleOutcome {
    pub fn local_id(&self) -> &LocalId {
        match self {
            ToggleOutcome::Applied(id) | ToggleOutcome::Coalesced(id) => id,
        }
    }
}

/// A pending local mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticEdit {
    pub local_id: LocalId,
    pub effect: Effect,
    pub status: EditStatus,
    toggle: Option<ToggleKey>,
    undo: Undo,
}

impl OptimisticEdit {
    pub fn toggle(&self) -> Option<&ToggleKey> {
        self.toggle.as_ref()
    }
}

/// Ledger of pending optimistic edits for one view.
#[derive(Debug, Clone)]
pub struct Mutator {
    node_id: NodeId,
    next: u64,
    edits: HashMap<LocalId, OptimisticEdit>,
    /// Insertion order of pending edits, used when re-applying after a refetch
    order: Vec<LocalId>,
    toggles: HashMap<ToggleKey, LocalId>,
}

impl Mutator {
    /// Create a mutator whose local ids are prefixed with `node_id`.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            next: 0,
            edits: HashMap::new(),
            order: Vec::new(),
            toggles: HashMap::new(),
        }
    }

    fn next_local_id(&mut self) -> LocalId {
        self.next += 1;
        format!("{}:{}", self.node_id, self.next)
    }

    /// Apply an effect and track it as pending.
    pub fn apply(
        &mut self,
        effect: Effect,
        collection: &mut LiveCollection,
        counters: &mut CounterCache,
    ) -> Result<LocalId> {
        self.apply_tracked(effect, None, collection, counters)
    }

    /// Apply a toggle-style effect. While an edit for the same key is
    /// pending, further toggles are coalesced into it.
    pub fn toggle(
        &mut self,
        key: ToggleKey,
        effect: Effect,
        collection: &mut LiveCollection,
        counters: &mut CounterCache,
    ) -> Result<ToggleOutcome> {
        if let Some(pending) = self.toggles.get(&key) {
            return Ok(ToggleOutcome::Coalesced(pending.clone()));
        }
        let local_id = self.apply_tracked(effect, Some(key.clone()), collection, counters)?;
        self.toggles.insert(key, local_id.clone());
        Ok(ToggleOutcome::Applied(local_id))
    }

    fn apply_tracked(
        &mut self,
        effect: Effect,
        toggle: Option<ToggleKey>,
        collection: &mut LiveCollection,
        counters: &mut CounterCache,
    ) -> Result<LocalId> {
        let local_id = self.next_local_id();
        let (effect, undo) = apply_effect(effect, &local_id, collection, counters)?;

        self.order.push(local_id.clone());
        self.edits.insert(
            local_id.clone(),
            OptimisticEdit {
                local_id: local_id.clone(),
                effect,
                status: EditStatus::Pending,
                toggle,
                undo,
            },
        );
        Ok(local_id)
    }

    /// Confirm an edit with the record the store returned, if any.
    ///
    /// If the feed already delivered the row the collection is left as it
    /// is: an echo that replaced the placeholder, a later update, or a delete
    /// all win over the row the write returned.
    pub fn confirm(
        &mut self,
        local_id: &str,
        server: Option<Record>,
        collection: &mut LiveCollection,
        counters: &mut CounterCache,
    ) -> Result<OptimisticEdit> {
        let mut edit = self.take(local_id)?;

        match (&edit.effect, server) {
            (Effect::Insert { .. }, Some(mut server)) => {
                let placeholder = collection.remove_placeholder(local_id);
                if let Some(placeholder) = &placeholder {
                    counters.on_change(Some(placeholder), None);
                }
                server.local_id.get_or_insert_with(|| local_id.to_string());
                let echoed = placeholder.is_none() && collection.position(&server).is_some();
                if !echoed {
                    adopt(server, collection, counters);
                }
            }
            (Effect::Update { .. }, Some(server)) => {
                adopt(server, collection, counters);
            }
            _ => {}
        }

        edit.status = EditStatus::Confirmed;
        Ok(edit)
    }

    /// Revert exactly what an edit applied.
    pub fn rollback(
        &mut self,
        local_id: &str,
        collection: &mut LiveCollection,
        counters: &mut CounterCache,
    ) -> Result<OptimisticEdit> {
        let mut edit = self.take(local_id)?;

        match &edit.undo {
            Undo::RemovePlaceholder(local_id) => {
                if let Some(placeholder) = collection.remove_placeholder(local_id) {
                    counters.on_change(Some(&placeholder), None);
                }
            }
            Undo::Restore(record) => {
                if collection.position(record).is_none() {
                    upsert_counted(record.clone(), collection, counters);
                }
            }
            Undo::Revert { previous, applied } => {
                let untouched = collection
                    .position(applied)
                    .is_some_and(|pos| &collection.records()[pos] == applied);
                if untouched {
                    upsert_counted(previous.clone(), collection, counters);
                }
            }
            Undo::Counter { key, delta } => counters.increment(key, -delta),
        }

        edit.status = EditStatus::RolledBack;
        Ok(edit)
    }

    fn take(&mut self, local_id: &str) -> Result<OptimisticEdit> {
        let edit = self
            .edits
            .remove(local_id)
            .ok_or_else(|| Error::EditNotFound(local_id.to_string()))?;
        self.order.retain(|id| id != local_id);
        if let Some(key) = &edit.toggle {
            self.toggles.remove(key);
        }
        Ok(edit)
    }

    /// Re-apply pending effects on top of a freshly fetched collection.
    ///
    /// Counter-only effects are not re-applied here; see
    /// [`Mutator::pending_counter_deltas`].
    pub fn reapply_pending(&self, collection: &mut LiveCollection, counters: &mut CounterCache) {
        for local_id in &self.order {
            let Some(edit) = self.edits.get(local_id) else {
                continue;
            };
            match &edit.effect {
                Effect::Insert { record } => {
                    if collection.find_local(local_id).is_none() {
                        upsert_counted(record.clone(), collection, counters);
                    }
                }
                Effect::Update { record } => {
                    if collection.position(record).is_some() {
                        upsert_counted(record.clone(), collection, counters);
                    }
                }
                Effect::Delete { id } => {
                    if let Some(removed) = collection.remove(&Record::key_only(id.clone())) {
                        counters.on_change(Some(&removed), None);
                    }
                }
                Effect::AdjustCounter { .. } => {}
            }
        }
    }

    /// Sum of pending counter-only adjustments per key.
    pub fn pending_counter_deltas(&self) -> HashMap<CounterKey, i64> {
        let mut deltas = HashMap::new();
        for edit in self.edits.values() {
            if let Effect::AdjustCounter { key, delta } = &edit.effect {
                *deltas.entry(key.clone()).or_insert(0) += delta;
            }
        }
        deltas
    }

    pub fn status(&self, local_id: &str) -> Option<EditStatus> {
        self.edits.get(local_id).map(|e| e.status)
    }

    pub fn get(&self, local_id: &str) -> Option<&OptimisticEdit> {
        self.edits.get(local_id)
    }

    /// Pending edits in the order they were applied.
    pub fn pending(&self) -> impl Iterator<Item = &OptimisticEdit> {
        self.order.iter().filter_map(|id| self.edits.get(id))
    }

    pub fn pending_count(&self) -> usize {
        self.edits.len()
    }

    /// Forget every pending edit without reverting it.
    pub fn abandon_all(&mut self) -> usize {
        let count = self.edits.len();
        self.edits.clear();
        self.order.clear();
        self.toggles.clear();
        count
    }
}

fn upsert_counted(record: Record, collection: &mut LiveCollection, counters: &mut CounterCache) {
    match collection.upsert(record.clone()) {
        Upsert::Inserted => counters.on_change(None, Some(&record)),
        Upsert::Replaced(previous) => counters.on_change(Some(&previous), Some(&record)),
    }
}

/// Upsert a row the store returned unless the feed holds a newer value for
/// it or deleted it.
fn adopt(server: Record, collection: &mut LiveCollection, counters: &mut CounterCache) {
    if let Some(id) = server.id.as_deref() {
        if collection.is_buried(id) {
            return;
        }
    }
    if let Some(pos) = collection.position(&server) {
        let held = &collection.records()[pos];
        let revised = held
            .id
            .as_deref()
            .is_some_and(|id| collection.is_revised(id));
        if is_stale(held, &server) || (revised && !is_newer(held, &server)) {
            return;
        }
    }
    upsert_counted(server, collection, counters);
}

fn apply_effect(
    effect: Effect,
    local_id: &str,
    collection: &mut LiveCollection,
    counters: &mut CounterCache,
) -> Result<(Effect, Undo)> {
    match effect {
        Effect::Insert { mut record } => {
            record.id = None;
            record.local_id = Some(local_id.to_string());
            upsert_counted(record.clone(), collection, counters);
            Ok((
                Effect::Insert { record },
                Undo::RemovePlaceholder(local_id.to_string()),
            ))
        }
        Effect::Update { record } => {
            let id = record.id.clone().ok_or(Error::MissingId)?;
            let previous = collection
                .get(&id)
                .cloned()
                .ok_or_else(|| Error::RecordNotFound(id.clone()))?;
            upsert_counted(record.clone(), collection, counters);
            Ok((
                Effect::Update {
                    record: record.clone(),
                },
                Undo::Revert {
                    previous,
                    applied: record,
                },
            ))
        }
        Effect::Delete { id } => {
            let removed = collection
                .remove(&Record::key_only(id.clone()))
                .ok_or_else(|| Error::RecordNotFound(id.clone()))?;
            counters.on_change(Some(&removed), None);
            Ok((Effect::Delete { id }, Undo::Restore(removed)))
        }
        Effect::AdjustCounter { key, delta } => {
            counters.increment(&key, delta);
            Ok((
                Effect::AdjustCounter {
                    key: key.clone(),
                    delta,
                },
                Undo::Counter { key, delta },
            ))
        }
    }
}
