//! In-memory backend.
//!
//! Implements every collaborator trait against process memory and publishes
//! a change for every write, the way the hosted store's replication does.
//! Faults can be injected to exercise rollback and resubscription paths.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arthub_engine::{
    ChangeKind, Entity, RawChange, SortOrder, AUTHOR_COLUMN, CLIENT_REF_COLUMN,
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::{json, Map, Value};

use crate::backend::{ChangeFeedService, ChangeStream, DataStore, FeedFilter, ObjectStore, Query};
use crate::error::{StoreError, StoreResult};

/// Columns the store owns; callers cannot set them.
const SERVER_COLUMNS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Unique constraints per entity.
fn unique_columns(entity: Entity) -> &'static [&'static str] {
    match entity {
        Entity::Likes => &["user_id", "artwork_id"],
        Entity::OpenCallSubmissions => &["open_call_id", "user_id"],
        _ => &[],
    }
}

struct Subscriber {
    entity: Entity,
    filter: Option<FeedFilter>,
    sender: mpsc::UnboundedSender<RawChange>,
}

#[derive(Default)]
struct Faults {
    failures: VecDeque<StoreError>,
    write_delay: Option<Duration>,
    query_delay: Option<Duration>,
    denied: HashSet<Entity>,
    suppress_client_ref: bool,
}

#[derive(Default)]
struct Inner {
    tables: DashMap<Entity, Vec<Value>>,
    subscribers: DashMap<u64, Subscriber>,
    next_subscriber: AtomicU64,
    subscribe_failures: AtomicUsize,
    query_failures: AtomicUsize,
    last_millis: AtomicI64,
    faults: Mutex<Faults>,
    objects: DashMap<String, Vec<u8>>,
}

/// Store, change feed and object store in one process.
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Strictly increasing wall-clock milliseconds.
    fn next_millis(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        match self
            .inner
            .last_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            }) {
            Ok(last) | Err(last) => now.max(last + 1),
        }
    }

    /// Store a row directly, without faults or change notifications.
    /// Missing `id`/`created_at` are filled in.
    pub fn seed(&self, entity: Entity, row: Value) -> Value {
        let mut row = match row {
            Value::Object(row) => row,
            _ => Map::new(),
        };
        if !row.contains_key("id") {
            row.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
        }
        if !row.contains_key("created_at") {
            row.insert("created_at".into(), json!(self.next_millis()));
        }
        let row = Value::Object(row);
        self.inner
            .tables
            .entry(entity)
            .or_default()
            .push(row.clone());
        row
    }

    /// Every stored row of `entity`, in insertion order.
    pub fn rows(&self, entity: Entity) -> Vec<Value> {
        self.inner
            .tables
            .get(&entity)
            .map(|t| t.value().clone())
            .unwrap_or_default()
    }

    /// Fail the next write with `err`. Calls queue up.
    pub fn fail_next_write(&self, err: StoreError) {
        self.faults().failures.push_back(err);
    }

    /// Delay every write before it is applied.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.faults().write_delay = delay;
    }

    /// Delay every query after its rows are read, so writes made meanwhile
    /// reach the feed but not the result.
    pub fn set_query_delay(&self, delay: Option<Duration>) {
        self.faults().query_delay = delay;
    }

    /// Reject writes to `entity` as a row-level security policy would.
    pub fn deny_writes(&self, entity: Entity) {
        self.faults().denied.insert(entity);
    }

    /// Drop `client_ref` from stored rows, as a store without the column would.
    pub fn suppress_client_ref(&self, suppress: bool) {
        self.faults().suppress_client_ref = suppress;
    }

    /// Make the next `count` subscribe calls fail.
    pub fn fail_next_subscribes(&self, count: usize) {
        self.inner.subscribe_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` queries fail.
    pub fn fail_next_queries(&self, count: usize) {
        self.inner.query_failures.store(count, Ordering::SeqCst);
    }

    /// Close every feed connection. Returns how many were open.
    pub fn drop_connections(&self) -> usize {
        let count = self.inner.subscribers.len();
        self.inner.subscribers.clear();
        tracing::debug!(connections = count, "Dropped feed connections");
        count
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Deliver a change to matching subscribers without touching any table,
    /// e.g. to replay a duplicate. Returns the number of recipients.
    pub fn emit(&self, change: RawChange) -> usize {
        let Some(entity) = Entity::from_table(&change.table) else {
            return 0;
        };
        let row = change.row().cloned();
        let mut delivered = 0;

        self.inner.subscribers.retain(|_, sub| {
            let wanted = sub.entity == entity
                && (change.event_type == ChangeKind::Delete
                    || match (&sub.filter, &row) {
                        (None, _) => true,
                        (Some(filter), Some(row)) => filter.matches(row),
                        (Some(_), None) => false,
                    });
            if !wanted {
                return true;
            }
            let open = sub.sender.unbounded_send(change.clone()).is_ok();
            if open {
                delivered += 1;
            }
            open
        });

        delivered
    }

    /// An uploaded object, by bucket and path.
    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.inner
            .objects
            .get(&format!("{}/{}", bucket, path))
            .map(|o| o.value().clone())
    }

    async fn before_write(&self, entity: Entity) -> StoreResult<()> {
        let delay = self.faults().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut faults = self.faults();
        if let Some(err) = faults.failures.pop_front() {
            return Err(err);
        }
        if faults.denied.contains(&entity) {
            return Err(StoreError::PermissionDenied(format!(
                "new row violates row-level security policy for table \"{}\"",
                entity
            )));
        }
        Ok(())
    }
}

/// Decrement a fault counter, returning whether a fault was pending.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn id_of(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

#[async_trait]
impl DataStore for MemoryBackend {
    async fn insert(&self, entity: Entity, row: Value) -> StoreResult<Value> {
        self.before_write(entity).await?;

        let Value::Object(mut row) = row else {
            return Err(StoreError::Rejected(format!("{} row must be an object", entity)));
        };
        for column in SERVER_COLUMNS {
            row.remove(column);
        }
        if !row.contains_key(AUTHOR_COLUMN) {
            return Err(StoreError::Constraint(format!(
                "null value in column \"{}\" of relation \"{}\"",
                AUTHOR_COLUMN, entity
            )));
        }
        if self.faults().suppress_client_ref {
            row.remove(CLIENT_REF_COLUMN);
        }
        if entity == Entity::Messages {
            row.entry("read").or_insert(Value::Bool(false));
        }

        let stored = {
            let mut table = self.inner.tables.entry(entity).or_default();
            let unique = unique_columns(entity);
            if !unique.is_empty()
                && table
                    .iter()
                    .any(|existing| unique.iter().all(|c| existing.get(*c) == row.get(*c)))
            {
                return Err(StoreError::Constraint(format!(
                    "duplicate key value violates unique constraint on {} ({})",
                    entity,
                    unique.join(", ")
                )));
            }

            row.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
            row.insert("created_at".into(), json!(self.next_millis()));
            let stored = Value::Object(row);
            table.push(stored.clone());
            stored
        };

        self.emit(RawChange::insert(entity, stored.clone()));
        Ok(stored)
    }

    async fn update(&self, entity: Entity, id: &str, patch: Value) -> StoreResult<Value> {
        self.before_write(entity).await?;

        let Some(patch) = patch.as_object() else {
            return Err(StoreError::Rejected(format!("{} patch must be an object", entity)));
        };

        let (old, new) = {
            let mut table = self.inner.tables.entry(entity).or_default();
            let pos = table
                .iter()
                .position(|r| id_of(r) == Some(id))
                .ok_or_else(|| StoreError::NotFound(format!("{} {}", entity, id)))?;

            let old = table[pos].clone();
            let mut new = old.clone();
            if let Some(obj) = new.as_object_mut() {
                for (column, value) in patch {
                    if !SERVER_COLUMNS.contains(&column.as_str()) {
                        obj.insert(column.clone(), value.clone());
                    }
                }
                obj.insert("updated_at".into(), json!(self.next_millis()));
            }
            table[pos] = new.clone();
            (old, new)
        };

        self.emit(RawChange::update(entity, old, new.clone()));
        Ok(new)
    }

    async fn delete(&self, entity: Entity, id: &str) -> StoreResult<()> {
        self.before_write(entity).await?;

        {
            let mut table = self.inner.tables.entry(entity).or_default();
            let pos = table
                .iter()
                .position(|r| id_of(r) == Some(id))
                .ok_or_else(|| StoreError::NotFound(format!("{} {}", entity, id)))?;
            table.remove(pos);
        }

        // Old rows of deletes carry only the primary key
        self.emit(RawChange::delete(entity, json!({ "id": id })));
        Ok(())
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Value>> {
        let failed = take_one(&self.inner.query_failures);
        let mut rows: Vec<Value> = self
            .rows(query.entity)
            .into_iter()
            .filter(|row| query.filter.as_ref().map_or(true, |f| f.matches(row)))
            .collect();

        let key = |row: &Value| {
            (
                row.get("created_at").and_then(Value::as_i64).unwrap_or(0),
                id_of(row).unwrap_or_default().to_string(),
            )
        };
        rows.sort_by_key(key);
        if query.order == SortOrder::Descending {
            rows.reverse();
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        let delay = self.faults().query_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failed {
            return Err(StoreError::Unavailable("database unavailable".into()));
        }
        Ok(rows)
    }
}

#[async_trait]
impl ChangeFeedService for MemoryBackend {
    async fn subscribe(
        &self,
        entity: Entity,
        filter: Option<FeedFilter>,
    ) -> StoreResult<ChangeStream> {
        if take_one(&self.inner.subscribe_failures) {
            return Err(StoreError::Unavailable("feed service unavailable".into()));
        }

        let (sender, receiver) = mpsc::unbounded();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.insert(
            id,
            Subscriber {
                entity,
                filter,
                sender,
            },
        );
        Ok(receiver.boxed())
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> StoreResult<String> {
        if bytes.is_empty() {
            return Err(StoreError::Rejected("empty upload".into()));
        }
        let key = format!("{}/{}", bucket, path);
        self.inner.objects.insert(key.clone(), bytes);
        Ok(format!("memory://{}", key))
    }
}
