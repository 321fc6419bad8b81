//! ArtHub Sync - mounts one live view against PostgreSQL and logs it.
//!
//! Which view is watched comes from `ARTHUB_WATCH_ENTITY`,
//! `ARTHUB_WATCH_SCOPE` and `ARTHUB_USER_ID`.

use std::sync::Arc;

use arthub_sync::db;
use arthub_sync::{
    PgChangeFeed, PgStore, StaticIdentity, SyncConfig, ViewBinder, ViewNotice, WatchConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arthub_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = SyncConfig::from_env()?;
    let watch = WatchConfig::from_env()?;

    let pool = db::create_pool(config.database_url()?).await?;
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    let binder = ViewBinder::new(
        Arc::new(PgStore::new(pool.clone())),
        Arc::new(PgChangeFeed::new(pool)),
        Arc::new(StaticIdentity::new(watch.user_id.clone())),
        &config,
    );

    let view = binder.mount(watch.spec(config.fetch_limit));
    tracing::info!(table = %watch.entity, scope = %watch.scope, user = %watch.user_id, "Watching");

    let mut snapshots = view.watch();
    let mut notices = view.take_notices();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                tracing::info!(
                    status = ?snapshot.status,
                    records = snapshot.records.len(),
                    pending = snapshot.pending,
                    counters = ?snapshot.counters,
                    "View changed"
                );
            }
            Some(notice) = async {
                match notices.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => match notice {
                ViewNotice::WriteFailed { local_id, error } => {
                    tracing::warn!(%local_id, %error, "Write rolled back");
                }
                ViewNotice::FetchFailed { error } => {
                    tracing::warn!(%error, "Fetch failed, retrying");
                    tokio::time::sleep(config.resubscribe_backoff).await;
                    view.refetch()?;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    view.unmount().await;
    Ok(())
}
