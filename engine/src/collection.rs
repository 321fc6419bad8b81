//! Live collection - the ordered record list behind a view.

use crate::{Record, RecordId, SortOrder};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};

/// How many deleted ids are remembered. Deletes reach every view of a
/// table, so only the most recent ones are kept.
pub const TOMBSTONE_LIMIT: usize = 1024;

/// Outcome of an upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    /// No record with the same key existed
    Inserted,
    /// An existing record was replaced; holds the previous value
    Replaced(Record),
}

/// An ordered sequence of records with unique keys.
///
/// Records are kept sorted by `created_at` (direction per [`SortOrder`]) with
/// ties broken by id. Two records never share a key, see [`Record::same_key`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveCollection {
    order: SortOrder,
    records: Vec<Record>,
    /// Ids whose current value came from an update event
    #[serde(skip)]
    revised: HashSet<RecordId>,
    /// Ids the feed reported as deleted
    #[serde(skip)]
    tombstones: HashSet<RecordId>,
    /// Tombstones oldest first
    #[serde(skip)]
    buried: VecDeque<RecordId>,
}

impl LiveCollection {
    /// Create an empty collection.
    pub fn new(order: SortOrder) -> Self {
        Self {
            order,
            records: Vec::new(),
            revised: HashSet::new(),
            tombstones: HashSet::new(),
            buried: VecDeque::new(),
        }
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in display order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Get a record by server id.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id.as_deref() == Some(id))
    }

    /// Get a record by client reference.
    pub fn find_local(&self, local_id: &str) -> Option<&Record> {
        self.records
            .iter()
            .find(|r| r.local_id.as_deref() == Some(local_id))
    }

    /// Position of the record sharing a key with `record`.
    pub fn position(&self, record: &Record) -> Option<usize> {
        self.records.iter().position(|r| r.same_key(record))
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let ascending = a
            .created_at
            .cmp(&b.created_at)
            .then_with(|| a.sort_id().cmp(b.sort_id()));
        match self.order {
            SortOrder::Ascending => ascending,
            SortOrder::Descending => ascending.reverse(),
        }
    }

    fn insert_sorted(&mut self, record: Record) {
        let at = self
            .records
            .partition_point(|r| self.compare(r, &record) == Ordering::Less);
        self.records.insert(at, record);
    }

    /// Insert a record, or replace the one sharing its key.
    ///
    /// A replacement stays in place unless its sort key changed (e.g. a
    /// placeholder adopting the server's id and timestamp).
    pub fn upsert(&mut self, record: Record) -> Upsert {
        match self.position(&record) {
            Some(pos) => {
                if self.compare(&self.records[pos], &record) == Ordering::Equal {
                    Upsert::Replaced(std::mem::replace(&mut self.records[pos], record))
                } else {
                    let previous = self.records.remove(pos);
                    self.insert_sorted(record);
                    Upsert::Replaced(previous)
                }
            }
            None => {
                self.insert_sorted(record);
                Upsert::Inserted
            }
        }
    }

    /// Remove the record sharing a key with `record`.
    pub fn remove(&mut self, record: &Record) -> Option<Record> {
        let pos = self.position(record)?;
        let removed = self.records.remove(pos);
        if let Some(id) = &removed.id {
            self.revised.remove(id);
        }
        Some(removed)
    }

    /// Remove an unconfirmed placeholder by client reference.
    pub fn remove_placeholder(&mut self, local_id: &str) -> Option<Record> {
        let pos = self
            .records
            .iter()
            .position(|r| r.id.is_none() && r.local_id.as_deref() == Some(local_id))?;
        Some(self.records.remove(pos))
    }

    /// Replace the whole collection. Later duplicates win.
    pub fn replace_all(&mut self, records: impl IntoIterator<Item = Record>) {
        self.clear();
        for record in records {
            self.upsert(record);
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.revised.clear();
        self.tombstones.clear();
        self.buried.clear();
    }

    pub(crate) fn mark_revised(&mut self, id: &str) {
        self.revised.insert(id.to_string());
    }

    pub(crate) fn is_revised(&self, id: &str) -> bool {
        self.revised.contains(id)
    }

    /// Remember a deleted id, forgetting the oldest past [`TOMBSTONE_LIMIT`].
    pub(crate) fn bury(&mut self, id: &str) {
        if !self.tombstones.insert(id.to_string()) {
            return;
        }
        self.buried.push_back(id.to_string());
        if self.buried.len() > TOMBSTONE_LIMIT {
            if let Some(oldest) = self.buried.pop_front() {
                self.tombstones.remove(&oldest);
            }
        }
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub(crate) fn is_buried(&self, id: &str) -> bool {
        self.tombstones.contains(id)
    }
}
