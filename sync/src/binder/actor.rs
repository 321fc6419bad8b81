//! The task that owns one mounted view.
//!
//! Every mutation of a [`LiveView`] happens here, one command at a time:
//! feed events, fetch results, optimistic edits and write outcomes all
//! arrive as [`Command`]s on the same queue, so no locking is needed and no
//! two sources can interleave inside an update.

use std::sync::Arc;
use std::time::Duration;

use arthub_engine::{
    Effect, Entity, FeedEvent, LiveView, LocalId, Record, ToggleOutcome, ViewSpec,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use super::command::{Command, Plan, ViewNotice, ViewSnapshot, ViewStatus, Write};
use crate::backend::{DataStore, Query};
use crate::error::{Result, StoreError, StoreResult, SyncError};
use crate::feed::{FeedClient, FeedSignal, SubscriptionHandle};

pub(crate) struct ViewActor {
    pub(crate) spec: ViewSpec,
    pub(crate) view: LiveView,
    pub(crate) store: Arc<dyn DataStore>,
    pub(crate) feed: FeedClient,
    pub(crate) write_timeout: Duration,
    pub(crate) sender: mpsc::UnboundedSender<Command>,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
    pub(crate) snapshots: watch::Sender<ViewSnapshot>,
    pub(crate) notices: mpsc::UnboundedSender<ViewNotice>,
    pub(crate) subscription: Option<SubscriptionHandle>,
    pub(crate) status: ViewStatus,
    /// Bumped on every (re)subscription; older feed signals are ignored
    pub(crate) generation: u64,
    /// Bumped on every fetch; only the latest result is applied
    pub(crate) fetch: u64,
    /// Feed events received while a fetch is in flight
    pub(crate) backlog: Option<Vec<FeedEvent>>,
}

impl ViewActor {
    pub(crate) async fn run(mut self) {
        tracing::info!(table = %self.view.entity(), scope = %self.view.scope(), "View mounted");
        self.open();
        self.publish();

        while let Some(command) = self.commands.recv().await {
            if let Command::Unmount { reply } = command {
                self.close();
                let _ = reply.send(());
                return;
            }
            self.handle(command);
            self.publish();
        }
        self.close();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Feed { generation, signal } => self.on_feed(generation, signal),
            Command::FetchFinished { fetch, result } => self.finish_fetch(fetch, result),
            Command::Apply { plan, reply } => self.apply(plan, reply),
            Command::WriteFinished { local_id, result } => self.finish_write(local_id, result),
            Command::Rescope { scope } => {
                self.subscription = None;
                self.backlog = None;
                let abandoned = self.view.rescope(scope);
                tracing::info!(scope = %self.view.scope(), abandoned, "View rescoped");
                self.open();
            }
            Command::Refetch => self.start_fetch(),
            Command::Unmount { .. } => {}
        }
    }

    /// Subscribe to the current scope. The fetch starts once the feed
    /// reports [`FeedSignal::Subscribed`]; events until then are buffered.
    fn open(&mut self) {
        self.generation += 1;
        // a fetch still running for the previous scope is superseded
        self.fetch += 1;
        self.status = ViewStatus::Loading;
        self.backlog = Some(Vec::new());
        let generation = self.generation;
        let sender = self.sender.clone();

        self.subscription = Some(self.feed.subscribe(
            self.view.entity(),
            self.view.scope().clone(),
            move |signal| {
                let _ = sender.send(Command::Feed { generation, signal });
            },
        ));
    }

    fn close(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        let abandoned = self.view.abandon_pending();
        tracing::info!(table = %self.view.entity(), abandoned, "View unmounted");
    }

    fn start_fetch(&mut self) {
        self.fetch += 1;
        let fetch = self.fetch;
        self.status = ViewStatus::Loading;
        self.backlog.get_or_insert_with(Vec::new);

        let query = Query::for_view(&self.spec, self.view.scope());
        let store = self.store.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = store.query(&query).await;
            let _ = sender.send(Command::FetchFinished { fetch, result });
        });
    }

    fn finish_fetch(&mut self, fetch: u64, result: StoreResult<Vec<Value>>) {
        if fetch != self.fetch {
            tracing::debug!(fetch, latest = self.fetch, "Ignoring superseded fetch");
            return;
        }

        match result {
            Ok(rows) => {
                let entity = self.view.entity();
                let records: Vec<Record> = rows
                    .iter()
                    .filter_map(|row| decode(entity, row))
                    .collect();
                tracing::debug!(table = %entity, rows = records.len(), "Fetch complete");
                self.view.ingest_initial(records);
                self.status = ViewStatus::Ready;
            }
            Err(error) => {
                tracing::warn!(table = %self.view.entity(), %error, "Fetch failed");
                self.status = ViewStatus::Failed(error.to_string());
                let _ = self.notices.send(ViewNotice::FetchFailed { error });
            }
        }

        for event in self.backlog.take().unwrap_or_default() {
            self.view.ingest_event(event);
        }
    }

    fn on_feed(&mut self, generation: u64, signal: FeedSignal) {
        if generation != self.generation {
            return;
        }
        match signal {
            FeedSignal::Event(event) => match self.backlog.as_mut() {
                Some(backlog) => backlog.push(event),
                None => {
                    let change = self.view.ingest_event(event);
                    tracing::trace!(?change, "Feed event applied");
                }
            },
            FeedSignal::Subscribed => {
                tracing::debug!(table = %self.view.entity(), "Feed connected, fetching");
                self.start_fetch();
            }
            FeedSignal::Resubscribed => {
                tracing::info!(table = %self.view.entity(), "Refetching after resubscribe");
                self.start_fetch();
            }
        }
    }

    fn apply(&mut self, plan: Plan, reply: oneshot::Sender<Result<Vec<ToggleOutcome>>>) {
        let _ = reply.send(self.apply_plan(plan));
    }

    fn apply_plan(&mut self, plan: Plan) -> Result<Vec<ToggleOutcome>> {
        let mut outcomes = Vec::new();
        for planned in plan(&self.view)? {
            let outcome = match planned.toggle {
                Some(key) => self.view.toggle(key, planned.effect)?,
                None => ToggleOutcome::Applied(self.view.apply_optimistic(planned.effect)?),
            };
            if let ToggleOutcome::Applied(local_id) = &outcome {
                self.spawn_write(local_id.clone(), planned.write);
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// The placeholder row of a pending insert, carrying its client reference.
    fn placeholder_row(&self, local_id: &str) -> Option<Value> {
        self.view
            .pending()
            .find(|edit| edit.local_id == local_id)
            .and_then(|edit| match &edit.effect {
                Effect::Insert { record } => Some(record.insert_row(self.view.entity())),
                _ => None,
            })
    }

    fn spawn_write(&self, local_id: LocalId, write: Write) {
        let entity = self.view.entity();
        let write = match write {
            Write::InsertPlaceholder => match self.placeholder_row(&local_id) {
                Some(row) => Write::Insert { row },
                None => Write::InsertPlaceholder,
            },
            other => other,
        };

        tracing::debug!(%local_id, table = %entity, ?write, "Sending write");
        let store = self.store.clone();
        let sender = self.sender.clone();
        let timeout = self.write_timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, execute(&*store, entity, write)).await
            {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(timeout)),
            };
            let _ = sender.send(Command::WriteFinished { local_id, result });
        });
    }

    fn finish_write(&mut self, local_id: LocalId, result: Result<Option<Value>>) {
        match result {
            Ok(row) => {
                let server = row.and_then(|row| decode(self.view.entity(), &row));
                match self.view.confirm(&local_id, server) {
                    Ok(_) => tracing::debug!(%local_id, "Write confirmed"),
                    Err(err) => tracing::debug!(%local_id, %err, "Write finished for abandoned edit"),
                }
            }
            Err(error) => match self.view.rollback(&local_id) {
                Ok(_) => {
                    tracing::warn!(%local_id, %error, "Write failed, edit rolled back");
                    let _ = self
                        .notices
                        .send(ViewNotice::WriteFailed { local_id, error });
                }
                Err(err) => tracing::debug!(%local_id, %err, "Write failed for abandoned edit"),
            },
        }
    }

    fn publish(&self) {
        let next = ViewSnapshot {
            status: self.status.clone(),
            scope: self.view.scope().clone(),
            records: self.view.records().to_vec(),
            counters: self.view.counters(),
            pending: self.view.pending_count(),
        };
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

fn decode(entity: Entity, row: &Value) -> Option<Record> {
    match Record::from_row(entity, row) {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::warn!(table = %entity, error = %err, "Skipping undecodable row");
            None
        }
    }
}

async fn execute(store: &dyn DataStore, entity: Entity, write: Write) -> Result<Option<Value>> {
    let stored = match write {
        Write::Insert { row } => Some(store.insert(entity, row).await?),
        Write::Update { id, patch } => Some(store.update(entity, &id, patch).await?),
        Write::Delete { id } => {
            store.delete(entity, &id).await?;
            None
        }
        Write::InsertPlaceholder => {
            return Err(StoreError::Rejected("insert without a placeholder".into()).into())
        }
    };
    Ok(stored)
}
