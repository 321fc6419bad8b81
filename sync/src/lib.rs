//! # ArtHub Sync
//!
//! Drives [`arthub_engine`] live views from the network.
//!
//! A mounted view subscribes to the change feed for its scope, fetches the
//! scope once, reconciles feed events as they arrive and runs optimistic
//! edits against the authoritative store, rolling them back when a write
//! fails or times out.
//!
//! ## Collaborators
//!
//! Everything external sits behind a trait in [`backend`]:
//! [`DataStore`], [`ChangeFeedService`], [`ObjectStore`] and
//! [`IdentityProvider`]. [`PgStore`] and [`PgChangeFeed`] implement the
//! first two over PostgreSQL, [`DirObjectStore`] stores uploads on disk, and
//! [`MemoryBackend`] implements all of them in process for tests.
//!
//! ## Mounting a view
//!
//! ```no_run
//! use std::sync::Arc;
//! use arthub_engine::ViewSpec;
//! use arthub_sync::{MemoryBackend, StaticIdentity, SyncConfig, ViewBinder};
//!
//! # async fn run() -> arthub_sync::Result<()> {
//! let backend = MemoryBackend::new();
//! let binder = ViewBinder::new(
//!     Arc::new(backend.clone()),
//!     Arc::new(backend.clone()),
//!     Arc::new(StaticIdentity::new("ana")),
//!     &SyncConfig::default(),
//! );
//!
//! let likes = binder.mount(ViewSpec::likes("art-1"));
//! likes.wait_for(|s| s.is_ready()).await?;
//! likes.toggle_like("ana").await?;
//! println!("{} likes", likes.snapshot().counter("art-1"));
//! likes.unmount().await;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod backend;
pub mod binder;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod memory;
pub mod storage;

pub use actions::{artwork_object_path, ARTWORK_BUCKET};
pub use backend::{
    ChangeFeedService, ChangeStream, DataStore, FeedFilter, IdentityProvider, ObjectStore, Query,
    StaticIdentity,
};
pub use binder::{Planned, ViewBinder, ViewHandle, ViewNotice, ViewSnapshot, ViewStatus, Write};
pub use config::{ConfigError, SyncConfig, WatchConfig};
pub use db::{PgChangeFeed, PgStore};
pub use error::{Result, StoreError, StoreResult, SyncError};
pub use feed::{ActiveSubscription, FeedClient, FeedSignal, SubscriptionHandle};
pub use memory::MemoryBackend;
pub use storage::DirObjectStore;
