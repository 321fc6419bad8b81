//! Live view state.
//!
//! A [`LiveView`] is the single owner of one scope's collection, counters and
//! pending edits. The reconciler and the mutator only ever touch that state
//! through it.

use crate::{
    error::Result, Change, CounterCache, CounterKey, CounterRule, Effect, Entity, FeedEvent,
    LiveCollection, LocalId, Mutator, NodeId, OptimisticEdit, Reconciler, Record, Scope, SortOrder,
    ToggleKey, ToggleOutcome, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything needed to mount a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSpec {
    pub entity: Entity,
    pub scope: Scope,
    pub order: SortOrder,
    pub counter: CounterRule,
    /// Maximum rows requested by the initial fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl ViewSpec {
    /// A view with the entity's default order and no counters.
    pub fn new(entity: Entity, scope: Scope) -> Self {
        Self {
            entity,
            scope,
            order: entity.default_order(),
            counter: CounterRule::None,
            limit: None,
        }
    }

    pub fn with_counter(mut self, rule: CounterRule) -> Self {
        self.counter = rule;
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Comments on one artwork, with a comment count.
    pub fn comments(artwork_id: &str) -> Self {
        Self::new(Entity::Comments, Scope::parent(artwork_id)).with_counter(CounterRule::PerParent)
    }

    /// Likes on one artwork, with a like count.
    pub fn likes(artwork_id: &str) -> Self {
        Self::new(Entity::Likes, Scope::parent(artwork_id)).with_counter(CounterRule::PerParent)
    }

    /// Every like, counted per artwork (popular ranking).
    pub fn all_likes() -> Self {
        Self::new(Entity::Likes, Scope::All).with_counter(CounterRule::PerParent)
    }

    /// One conversation, with the reader's unread count.
    pub fn conversation(conversation_id: &str, reader: &str) -> Self {
        Self::new(Entity::Messages, Scope::parent(conversation_id)).with_counter(
            CounterRule::UnreadFor {
                reader: reader.to_string(),
            },
        )
    }

    /// All messages visible to the reader, with unread counts per
    /// conversation (inbox badge).
    pub fn inbox(reader: &str) -> Self {
        Self::new(Entity::Messages, Scope::All)
            .with_order(SortOrder::Descending)
            .with_counter(CounterRule::UnreadFor {
                reader: reader.to_string(),
            })
    }

    /// Newest artworks across all artists.
    pub fn new_artworks() -> Self {
        Self::new(Entity::Artworks, Scope::All)
    }

    /// Submissions to one open call, counted.
    pub fn submissions(open_call_id: &str) -> Self {
        Self::new(Entity::OpenCallSubmissions, Scope::parent(open_call_id))
            .with_counter(CounterRule::PerParent)
    }
}

/// The reconciled state of one mounted scope.
#[derive(Debug, Clone)]
pub struct LiveView {
    entity: Entity,
    scope: Scope,
    collection: LiveCollection,
    counters: CounterCache,
    mutator: Mutator,
}

impl LiveView {
    pub fn new(spec: &ViewSpec, node_id: impl Into<NodeId>) -> Self {
        Self {
            entity: spec.entity,
            scope: spec.scope.clone(),
            collection: LiveCollection::new(spec.order),
            counters: CounterCache::new(spec.counter.clone()),
            mutator: Mutator::new(node_id),
        }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn records(&self) -> &[Record] {
        self.collection.records()
    }

    pub fn collection(&self) -> &LiveCollection {
        &self.collection
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.collection.get(id)
    }

    pub fn counter(&self, key: &str) -> i64 {
        self.counters.get(key)
    }

    pub fn counters(&self) -> BTreeMap<CounterKey, i64> {
        self.counters.snapshot()
    }

    pub fn counter_cache(&self) -> &CounterCache {
        &self.counters
    }

    pub fn pending(&self) -> impl Iterator<Item = &OptimisticEdit> {
        self.mutator.pending()
    }

    pub fn pending_count(&self) -> usize {
        self.mutator.pending_count()
    }

    /// Replace the collection with a bulk fetch.
    ///
    /// Pending edits are re-applied on top so an in-flight mutation stays
    /// visible, and counters are recomputed from scratch.
    pub fn ingest_initial(&mut self, records: impl IntoIterator<Item = Record>) {
        Reconciler::new(&self.scope, &mut self.collection, &mut self.counters)
            .ingest_initial(records);
        self.mutator
            .reapply_pending(&mut self.collection, &mut self.counters);
        for (key, delta) in self.mutator.pending_counter_deltas() {
            self.counters.increment(&key, delta);
        }
    }

    pub fn ingest_event(&mut self, event: FeedEvent) -> Change {
        Reconciler::new(&self.scope, &mut self.collection, &mut self.counters).ingest_event(event)
    }

    pub fn apply_optimistic(&mut self, effect: Effect) -> Result<LocalId> {
        self.mutator
            .apply(effect, &mut self.collection, &mut self.counters)
    }

    pub fn toggle(&mut self, key: ToggleKey, effect: Effect) -> Result<ToggleOutcome> {
        self.mutator
            .toggle(key, effect, &mut self.collection, &mut self.counters)
    }

    pub fn confirm(&mut self, local_id: &str, server: Option<Record>) -> Result<OptimisticEdit> {
        self.mutator
            .confirm(local_id, server, &mut self.collection, &mut self.counters)
    }

    pub fn rollback(&mut self, local_id: &str) -> Result<OptimisticEdit> {
        self.mutator
            .rollback(local_id, &mut self.collection, &mut self.counters)
    }

    /// Adjust a counter directly, outside any optimistic edit.
    pub fn increment(&mut self, key: &str, delta: i64) {
        self.counters.increment(key, delta);
    }

    /// Recompute one counter from the collection plus pending adjustments.
    pub fn recompute(&mut self, key: &str) {
        self.counters
            .recompute_from_collection(key, &self.collection);
        if let Some(delta) = self.mutator.pending_counter_deltas().get(key) {
            self.counters.increment(key, *delta);
        }
    }

    /// Recompute every counter from the collection plus pending adjustments.
    pub fn recompute_all(&mut self) {
        self.counters.recompute_all(&self.collection);
        for (key, delta) in self.mutator.pending_counter_deltas() {
            self.counters.increment(&key, delta);
        }
    }

    /// Move the view to another scope. The collection and counters are
    /// cleared and pending edits abandoned; the caller refetches.
    pub fn rescope(&mut self, scope: Scope) -> usize {
        self.scope = scope;
        self.collection.clear();
        self.counters.clear();
        self.mutator.abandon_all()
    }

    /// Drop pending edits without reverting them.
    pub fn abandon_pending(&mut self) -> usize {
        self.mutator.abandon_all()
    }

    /// The record `user_id` authored under `parent`, e.g. their like on an
    /// artwork.
    pub fn authored_by(&self, user_id: &UserId, parent: &str) -> Option<&Record> {
        self.collection
            .iter()
            .find(|r| &r.author_id == user_id && r.parent_key.as_deref() == Some(parent))
    }
}
