//! Change feed client.
//!
//! Owns one background task per subscription that reads the feed service,
//! converts raw changes into typed events and hands them to a callback. A
//! dropped connection is reopened with backoff; consumers only learn that a
//! gap may have happened through [`FeedSignal::Resubscribed`].
//!
//! [`FeedSignal::Subscribed`] marks the moment the first connection is
//! listening. A fetch started after it cannot miss a write, because every
//! later write also reaches the feed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arthub_engine::{Entity, FeedEvent, Scope};
use dashmap::DashMap;
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::backend::{ChangeFeedService, FeedFilter};

/// Longest delay between resubscribe attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// What a subscription delivers to its callback.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    /// The first connection is open and listening
    Subscribed,
    Event(FeedEvent),
    /// The connection was reopened; events may have been missed
    Resubscribed,
}

/// Registry entry for an open subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSubscription {
    pub id: u64,
    pub entity: Entity,
    pub scope: Scope,
}

type Registry = Arc<DashMap<u64, ActiveSubscription>>;

/// Opens and tracks change feed subscriptions.
#[derive(Clone)]
pub struct FeedClient {
    service: Arc<dyn ChangeFeedService>,
    backoff: Duration,
    registry: Registry,
    next_id: Arc<AtomicU64>,
}

impl FeedClient {
    pub fn new(service: Arc<dyn ChangeFeedService>, backoff: Duration) -> Self {
        Self {
            service,
            backoff,
            registry: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to `entity` changes within `scope`.
    ///
    /// Must be called from within a Tokio runtime. The subscription lives
    /// until the returned handle is unsubscribed or dropped.
    pub fn subscribe<F>(&self, entity: Entity, scope: Scope, on_event: F) -> SubscriptionHandle
    where
        F: FnMut(FeedSignal) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.registry.insert(
            id,
            ActiveSubscription {
                id,
                entity,
                scope: scope.clone(),
            },
        );
        tracing::info!(subscription = id, table = %entity, %scope, "Subscription opened");

        let task = tokio::spawn(run_subscription(
            self.service.clone(),
            self.backoff,
            id,
            entity,
            scope,
            on_event,
        ));

        SubscriptionHandle {
            id,
            registry: self.registry.clone(),
            task: Some(task),
        }
    }

    /// Number of open subscriptions.
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Open subscriptions, ordered by id.
    pub fn active(&self) -> Vec<ActiveSubscription> {
        let mut active: Vec<_> = self.registry.iter().map(|e| e.value().clone()).collect();
        active.sort_by_key(|s| s.id);
        active
    }
}

async fn run_subscription<F>(
    service: Arc<dyn ChangeFeedService>,
    backoff: Duration,
    id: u64,
    entity: Entity,
    scope: Scope,
    mut on_event: F,
) where
    F: FnMut(FeedSignal) + Send + 'static,
{
    let filter = FeedFilter::for_scope(entity, &scope);
    let mut failures: u32 = 0;
    let mut reconnecting = false;

    loop {
        match service.subscribe(entity, filter.clone()).await {
            Ok(mut stream) => {
                if reconnecting {
                    tracing::info!(subscription = id, table = %entity, "Resubscribed");
                    on_event(FeedSignal::Resubscribed);
                } else {
                    tracing::debug!(subscription = id, table = %entity, "Feed connected");
                    on_event(FeedSignal::Subscribed);
                }
                failures = 0;

                while let Some(raw) = stream.next().await {
                    match FeedEvent::from_raw(entity, &raw) {
                        Ok(event) => on_event(FeedSignal::Event(event)),
                        Err(err) => {
                            tracing::warn!(subscription = id, error = %err, "Skipping change")
                        }
                    }
                }
                tracing::debug!(subscription = id, "Feed connection closed");
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                tracing::warn!(subscription = id, attempt = failures, error = %err, "Subscribe failed");
            }
        }

        reconnecting = true;
        tokio::time::sleep(retry_delay(backoff, failures)).await;
    }
}

/// Delay before the next attempt: the base backoff after a dropped
/// connection, doubling with each consecutive failed attempt.
fn retry_delay(backoff: Duration, failures: u32) -> Duration {
    backoff
        .saturating_mul(1u32 << failures.min(16))
        .min(MAX_BACKOFF.max(backoff))
}

/// An open subscription. Unsubscribes on drop.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    registry: Registry,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Close the subscription. Calling it again does nothing.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.registry.remove(&self.id);
            tracing::info!(subscription = self.id, "Subscription closed");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
