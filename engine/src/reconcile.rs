//! Reconciliation of bulk fetches and feed events into a live collection.
//!
//! The feed is at-least-once and unordered relative to the initial fetch, so
//! every rule here is idempotent and order tolerant:
//!
//! 1. `insert` of a present key replaces it; of an absent key inserts sorted
//! 2. `update` replaces by key; an absent key is treated as an insert
//! 3. `delete` removes by key; an absent key is a no-op
//! 4. A change older than the held value (by `updated_at`) is dropped
//! 5. An `insert` never overrides a value that came from an `update`
//! 6. Ids the feed deleted are never resurrected by a late insert or update

use crate::{
    collection::Upsert, CounterCache, FeedEvent, LiveCollection, Record, Scope,
};
use serde::{Deserialize, Serialize};

/// What an ingested event did to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Change {
    Inserted,
    Replaced,
    Removed,
    /// Duplicate, stale, out of scope, or delete of an absent record
    Ignored,
}

/// Merges fetched rows and feed events into a collection and keeps its
/// counters in step.
pub struct Reconciler<'a> {
    scope: &'a Scope,
    collection: &'a mut LiveCollection,
    counters: &'a mut CounterCache,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        scope: &'a Scope,
        collection: &'a mut LiveCollection,
        counters: &'a mut CounterCache,
    ) -> Self {
        Self {
            scope,
            collection,
            counters,
        }
    }

    /// Replace the collection with a bulk fetch and recompute every counter.
    ///
    /// Calling this twice with the same rows yields the same state.
    pub fn ingest_initial(&mut self, records: impl IntoIterator<Item = Record>) {
        let scope = self.scope;
        self.collection
            .replace_all(records.into_iter().filter(|r| scope.admits(r)));
        self.counters.recompute_all(&*self.collection);
    }

    /// Merge one feed event.
    pub fn ingest_event(&mut self, event: FeedEvent) -> Change {
        if !self.scope.admits(event.record()) {
            return Change::Ignored;
        }

        match event {
            FeedEvent::Insert(record) => self.merge(record, false),
            FeedEvent::Update(record) => self.merge(record, true),
            FeedEvent::Delete(record) => self.delete(record),
        }
    }

    fn merge(&mut self, record: Record, is_update: bool) -> Change {
        if let Some(id) = &record.id {
            if self.collection.is_buried(id) {
                return Change::Ignored;
            }
        }

        if let Some(pos) = self.collection.position(&record) {
            let existing = &self.collection.records()[pos];
            if is_stale(existing, &record) {
                return Change::Ignored;
            }
            let revised = existing
                .id
                .as_deref()
                .is_some_and(|id| self.collection.is_revised(id));
            if !is_update && revised && !is_newer(existing, &record) {
                return Change::Ignored;
            }
        }

        let id = record.id.clone();
        let change = match self.collection.upsert(record.clone()) {
            Upsert::Inserted => {
                self.counters.on_change(None, Some(&record));
                Change::Inserted
            }
            Upsert::Replaced(previous) => {
                self.counters.on_change(Some(&previous), Some(&record));
                Change::Replaced
            }
        };

        if is_update {
            if let Some(id) = id {
                self.collection.mark_revised(&id);
            }
        }
        change
    }

    fn delete(&mut self, record: Record) -> Change {
        if let Some(id) = &record.id {
            self.collection.bury(id);
        }
        match self.collection.remove(&record) {
            Some(previous) => {
                self.counters.on_change(Some(&previous), None);
                Change::Removed
            }
            None => Change::Ignored,
        }
    }
}

pub(crate) fn is_stale(existing: &Record, incoming: &Record) -> bool {
    matches!(
        (existing.updated_at, incoming.updated_at),
        (Some(held), Some(got)) if got < held
    )
}

pub(crate) fn is_newer(existing: &Record, incoming: &Record) -> bool {
    matches!(
        (existing.updated_at, incoming.updated_at),
        (Some(held), Some(got)) if got > held
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::TOMBSTONE_LIMIT;
    use crate::{CounterRule, SortOrder};
    use serde_json::json;

    struct Fixture {
        scope: Scope,
        collection: LiveCollection,
        counters: CounterCache,
    }

    impl Fixture {
        fn new(order: SortOrder) -> Self {
            Self {
                scope: Scope::parent("art-1"),
                collection: LiveCollection::new(order),
                counters: CounterCache::new(CounterRule::PerParent),
            }
        }

        fn reconciler(&mut self) -> Reconciler<'_> {
            Reconciler::new(&self.scope, &mut self.collection, &mut self.counters)
        }

        fn ids(&self) -> Vec<String> {
            self.collection
                .iter()
                .map(|r| r.sort_id().to_string())
                .collect()
        }
    }

    fn rec(id: &str, created_at: i64) -> Record {
        Record::server(id, Some("art-1"), "u1", created_at, json!({"content": id}))
    }

    #[test]
    fn duplicate_insert_is_idempotent() {
        let mut f = Fixture::new(SortOrder::Descending);
        assert_eq!(f.reconciler().ingest_event(FeedEvent::Insert(rec("1", 10))), Change::Inserted);
        assert_eq!(f.reconciler().ingest_event(FeedEvent::Insert(rec("1", 10))), Change::Replaced);
        assert_eq!(f.ids(), vec!["1"]);
        assert_eq!(f.counters.get("art-1"), 1);
    }

    #[test]
    fn late_older_record_lands_in_order() {
        let mut f = Fixture::new(SortOrder::Ascending);
        f.reconciler().ingest_initial(vec![rec("1", 10)]);
        f.reconciler().ingest_event(FeedEvent::Insert(rec("2", 5)));
        assert_eq!(f.ids(), vec!["2", "1"]);

        let mut f = Fixture::new(SortOrder::Descending);
        f.reconciler().ingest_initial(vec![rec("1", 10)]);
        f.reconciler().ingest_event(FeedEvent::Insert(rec("2", 5)));
        assert_eq!(f.ids(), vec!["1", "2"]);
    }

    #[test]
    fn update_of_absent_record_inserts() {
        let mut f = Fixture::new(SortOrder::Descending);
        assert_eq!(f.reconciler().ingest_event(FeedEvent::Update(rec("1", 10))), Change::Inserted);
        assert_eq!(f.counters.get("art-1"), 1);
    }

    #[test]
    fn update_before_insert_keeps_update() {
        let mut edited = rec("1", 10);
        edited.payload = json!({"content": "edited"});

        let mut f = Fixture::new(SortOrder::Descending);
        f.reconciler().ingest_event(FeedEvent::Update(edited.clone()));
        assert_eq!(f.reconciler().ingest_event(FeedEvent::Insert(rec("1", 10))), Change::Ignored);
        assert_eq!(f.collection.records(), &[edited]);
    }

    #[test]
    fn stale_update_is_dropped() {
        let mut f = Fixture::new(SortOrder::Descending);
        f.reconciler()
            .ingest_initial(vec![rec("1", 10).with_updated_at(50)]);
        let change = f
            .reconciler()
            .ingest_event(FeedEvent::Update(rec("1", 10).with_updated_at(40)));
        assert_eq!(change, Change::Ignored);
        assert_eq!(f.collection.records()[0].updated_at, Some(50));
    }

    #[test]
    fn delete_absent_is_noop_and_blocks_resurrection() {
        let mut f = Fixture::new(SortOrder::Descending);
        assert_eq!(
            f.reconciler().ingest_event(FeedEvent::Delete(Record::key_only("1"))),
            Change::Ignored
        );
        assert_eq!(f.reconciler().ingest_event(FeedEvent::Insert(rec("1", 10))), Change::Ignored);
        assert!(f.collection.is_empty());
    }

    #[test]
    fn foreign_deletes_do_not_accumulate() {
        let mut f = Fixture::new(SortOrder::Descending);
        for i in 0..10_000 {
            let gone = Record::key_only(format!("other-scope-{}", i));
            f.reconciler().ingest_event(FeedEvent::Delete(gone));
        }
        assert!(f.collection.is_empty());
        assert_eq!(f.collection.tombstone_count(), TOMBSTONE_LIMIT);

        // a delete that names another parent is out of scope
        let mut gone = Record::key_only("x");
        gone.parent_key = Some("art-2".into());
        assert_eq!(f.reconciler().ingest_event(FeedEvent::Delete(gone)), Change::Ignored);
        assert!(!f.collection.is_buried("x"));
    }

    #[test]
    fn delete_updates_counter() {
        let mut f = Fixture::new(SortOrder::Descending);
        f.reconciler().ingest_initial(vec![rec("1", 10), rec("2", 20)]);
        assert_eq!(f.counters.get("art-1"), 2);
        assert_eq!(
            f.reconciler().ingest_event(FeedEvent::Delete(Record::key_only("1"))),
            Change::Removed
        );
        assert_eq!(f.counters.get("art-1"), 1);
    }

    #[test]
    fn out_of_scope_event_ignored() {
        let mut f = Fixture::new(SortOrder::Descending);
        let foreign = Record::server("9", Some("art-2"), "u1", 1, json!({}));
        assert_eq!(f.reconciler().ingest_event(FeedEvent::Insert(foreign)), Change::Ignored);
        assert!(f.collection.is_empty());
    }

    #[test]
    fn initial_fetch_filters_scope_and_replaces() {
        let mut f = Fixture::new(SortOrder::Descending);
        f.reconciler().ingest_event(FeedEvent::Insert(rec("stale", 1)));
        f.reconciler().ingest_initial(vec![
            rec("1", 10),
            Record::server("9", Some("art-2"), "u1", 1, json!({})),
        ]);
        assert_eq!(f.ids(), vec!["1"]);
        assert_eq!(f.counters.get("art-1"), 1);
    }

    #[test]
    fn feed_echo_collapses_placeholder() {
        let mut f = Fixture::new(SortOrder::Ascending);
        f.collection
            .upsert(Record::placeholder(Some("art-1"), "u1", 5, json!({})).with_local_id("n:1"));
        f.counters.recompute_all(&f.collection);

        let echo = rec("1", 6).with_local_id("n:1");
        assert_eq!(f.reconciler().ingest_event(FeedEvent::Insert(echo)), Change::Replaced);
        assert_eq!(f.ids(), vec!["1"]);
        assert_eq!(f.counters.get("art-1"), 1);
    }
}
