//! Change feed over `LISTEN/NOTIFY`.
//!
//! A trigger on every entity table publishes a JSON change on
//! [`CHANGE_CHANNEL`]. Each subscription holds its own listener connection;
//! when that connection is lost the stream ends and the feed client
//! resubscribes.
//!
//! Rows too large for a notification arrive marked `partial` with only their
//! id, and are loaded from the table before they are filtered and delivered.

use arthub_engine::{ChangeKind, Entity, RawChange};
use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::PgPool;

use super::normalize_row;
use crate::backend::{ChangeFeedService, ChangeStream, FeedFilter};
use crate::error::StoreResult;

/// Notification channel the change trigger publishes on.
pub const CHANGE_CHANNEL: &str = "arthub_changes";

/// A change notification as the trigger sends it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub change: RawChange,
    /// The row did not fit; `new` holds only its id
    #[serde(default)]
    pub partial: bool,
}

impl Notification {
    /// Id of the row to load before delivering a partial insert or update.
    pub fn missing_row(&self) -> Option<&str> {
        if !self.partial || self.change.event_type == ChangeKind::Delete {
            return None;
        }
        self.change
            .new_row
            .as_ref()
            .and_then(|row| row.get("id"))
            .and_then(Value::as_str)
    }
}

/// [`ChangeFeedService`] backed by Postgres notifications.
#[derive(Debug, Clone)]
pub struct PgChangeFeed {
    pool: PgPool,
}

impl PgChangeFeed {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Decode one notification payload for a subscription to `entity`.
///
/// Returns `None` for other tables and payloads that do not parse.
pub fn decode_notification(entity: Entity, payload: &str) -> Option<Notification> {
    let mut notification: Notification = match serde_json::from_str(payload) {
        Ok(notification) => notification,
        Err(err) => {
            tracing::warn!(error = %err, "Skipping malformed change notification");
            return None;
        }
    };

    if notification.change.table != entity.table() {
        return None;
    }
    if let Some(row) = notification.change.new_row.as_mut() {
        normalize_row(row);
    }
    if let Some(row) = notification.change.old_row.as_mut() {
        normalize_row(row);
    }
    Some(notification)
}

/// Whether a subscription with `filter` wants `change`. Deletes carry only
/// the primary key and always pass.
pub fn admits(filter: Option<&FeedFilter>, change: &RawChange) -> bool {
    match filter {
        Some(filter) if change.event_type != ChangeKind::Delete => {
            change.row().is_some_and(|row| filter.matches(row))
        }
        _ => true,
    }
}

async fn load_row(pool: &PgPool, entity: Entity, id: &str) -> StoreResult<Option<Value>> {
    let sql = format!("SELECT to_jsonb(t.*) FROM {} t WHERE t.id::text = $1", entity.table());
    let mut row: Option<Value> = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    if let Some(row) = row.as_mut() {
        normalize_row(row);
    }
    Ok(row)
}

async fn resolve(
    pool: &PgPool,
    entity: Entity,
    filter: Option<&FeedFilter>,
    payload: &str,
) -> Option<RawChange> {
    let notification = decode_notification(entity, payload)?;
    let missing = notification.missing_row().map(str::to_string);
    let mut change = notification.change;

    if let Some(id) = missing {
        match load_row(pool, entity, &id).await {
            Ok(Some(row)) => change.new_row = Some(row),
            // deleted since; its delete notification follows
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(table = %entity, %id, error = %err, "Could not load changed row");
                return None;
            }
        }
    }

    admits(filter, &change).then_some(change)
}

#[async_trait]
impl ChangeFeedService for PgChangeFeed {
    async fn subscribe(
        &self,
        entity: Entity,
        filter: Option<FeedFilter>,
    ) -> StoreResult<ChangeStream> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        tracing::debug!(table = %entity, ?filter, "Listening for changes");

        let notifications = stream::unfold(listener, |mut listener| async move {
            match listener.try_recv().await {
                Ok(Some(notification)) => Some((notification.payload().to_string(), listener)),
                Ok(None) => {
                    tracing::warn!("Change listener lost its connection");
                    None
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Change listener failed");
                    None
                }
            }
        });

        let pool = self.pool.clone();
        let changes = notifications
            .then(move |payload| {
                let pool = pool.clone();
                let filter = filter.clone();
                async move { resolve(&pool, entity, filter.as_ref(), &payload).await }
            })
            .filter_map(future::ready);
        Ok(changes.boxed())
    }
}
