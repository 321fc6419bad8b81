//! Derived counter cache.
//!
//! Counters are denormalised aggregates over a live collection (like counts,
//! unread badges). They are maintained incrementally on every collection
//! change and recomputed from scratch whenever the collection is replaced or a
//! gap in the feed is suspected.

use crate::{CounterKey, LiveCollection, Record, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Which records a counter counts, and under which key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CounterRule {
    /// No counters
    #[default]
    None,
    /// One per record, keyed by the record's parent
    PerParent,
    /// Messages not written by `reader` and not yet read, keyed by parent
    #[serde(rename_all = "camelCase")]
    UnreadFor { reader: UserId },
}

impl CounterRule {
    /// The counter a record contributes to, if any.
    pub fn key_for(&self, record: &Record) -> Option<CounterKey> {
        match self {
            CounterRule::None => None,
            CounterRule::PerParent => record.parent_key.clone(),
            CounterRule::UnreadFor { reader } => {
                let read = record
                    .field("read")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if &record.author_id != reader && !read {
                    record.parent_key.clone()
                } else {
                    None
                }
            }
        }
    }
}

/// Counters keyed by [`CounterKey`].
#[derive(Debug, Clone, Default)]
pub struct CounterCache {
    rule: CounterRule,
    values: HashMap<CounterKey, i64>,
}

impl CounterCache {
    pub fn new(rule: CounterRule) -> Self {
        Self {
            rule,
            values: HashMap::new(),
        }
    }

    pub fn rule(&self) -> &CounterRule {
        &self.rule
    }

    /// Current value of a counter (zero if never touched).
    pub fn get(&self, key: &str) -> i64 {
        self.values.get(key).copied().unwrap_or(0)
    }

    /// Adjust a counter by `delta`.
    pub fn increment(&mut self, key: &str, delta: i64) {
        let value = self.values.entry(key.to_string()).or_insert(0);
        *value += delta;
        if *value == 0 {
            self.values.remove(key);
        }
    }

    /// Account for a collection change: `old` left, `new` arrived.
    pub fn on_change(&mut self, old: Option<&Record>, new: Option<&Record>) {
        if let Some(key) = old.and_then(|r| self.rule.key_for(r)) {
            self.increment(&key, -1);
        }
        if let Some(key) = new.and_then(|r| self.rule.key_for(r)) {
            self.increment(&key, 1);
        }
    }

    /// Recompute one counter by scanning the collection.
    pub fn recompute_from_collection(&mut self, key: &str, collection: &LiveCollection) {
        let count = collection
            .iter()
            .filter(|r| self.rule.key_for(r).as_deref() == Some(key))
            .count() as i64;
        self.values.remove(key);
        if count != 0 {
            self.values.insert(key.to_string(), count);
        }
    }

    /// Recompute every counter by scanning the collection.
    pub fn recompute_all(&mut self, collection: &LiveCollection) {
        self.values.clear();
        for record in collection.iter() {
            if let Some(key) = self.rule.key_for(record) {
                *self.values.entry(key).or_insert(0) += 1;
            }
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// All non-zero counters, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<CounterKey, i64> {
        self.values.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}
