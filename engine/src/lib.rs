//! # ArtHub Engine
//!
//! Deterministic live-view reconciliation for ArtHub's realtime screens
//! (comments, messages, likes, unread badges, new-artwork feed).
//!
//! A live view combines three sources into one ordered collection:
//! an initial bulk fetch, a change feed, and local optimistic edits. This
//! crate holds the logic for merging them; the `arthub-sync` crate drives it
//! from the network.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches the network, clock or disk
//! - **Deterministic**: the same inputs always produce the same state
//! - **Order tolerant**: feed events may be duplicated or arrive out of order
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is a domain row with a server id (absent on an optimistic
//! placeholder), a client reference, a parent key, an author, a creation
//! timestamp and a JSON payload.
//!
//! ### Live collections
//!
//! A [`LiveCollection`] keeps records sorted by creation time with unique
//! keys. The [`Reconciler`] merges [`FeedEvent`]s and bulk fetches into it.
//!
//! ### Optimistic edits
//!
//! The [`Mutator`] applies an [`Effect`] immediately and tracks it as an
//! [`OptimisticEdit`] until it is confirmed or rolled back. Toggle-style
//! edits (likes) allow one pending edit per user and target.
//!
//! ### Derived counters
//!
//! The [`CounterCache`] maintains like counts and unread badges incrementally
//! and can recompute them from the collection at any time.
//!
//! ## Quick Start
//!
//! ```rust
//! use arthub_engine::{Effect, FeedEvent, LiveView, Record, ToggleKey, ViewSpec};
//! use serde_json::json;
//!
//! // 1. Mount the likes of one artwork
//! let mut view = LiveView::new(&ViewSpec::likes("art-1"), "tab-1");
//!
//! // 2. Ingest the initial fetch and a feed event
//! view.ingest_initial(vec![Record::server("l1", Some("art-1"), "ana", 10, json!({}))]);
//! view.ingest_event(FeedEvent::Insert(Record::server("l2", Some("art-1"), "bo", 11, json!({}))));
//! assert_eq!(view.counter("art-1"), 2);
//!
//! // 3. Like it optimistically, then the write fails
//! let outcome = view
//!     .toggle(
//!         ToggleKey::new("me", "art-1"),
//!         Effect::Insert {
//!             record: Record::placeholder(Some("art-1"), "me", 12, json!({})),
//!         },
//!     )
//!     .unwrap();
//! assert_eq!(view.counter("art-1"), 3);
//!
//! view.rollback(outcome.local_id()).unwrap();
//! assert_eq!(view.counter("art-1"), 2);
//! ```

pub mod collection;
pub mod counter;
pub mod entity;
pub mod error;
pub mod event;
pub mod optimistic;
pub mod ranking;
pub mod reconcile;
pub mod record;
pub mod view;

// Re-export main types at crate root
pub use collection::{LiveCollection, Upsert};
pub use counter::{CounterCache, CounterRule};
pub use entity::{Entity, Scope, SortOrder, AUTHOR_COLUMN, CLIENT_REF_COLUMN};
pub use error::Error;
pub use event::{ChangeKind, FeedEvent, RawChange};
pub use optimistic::{EditStatus, Effect, Mutator, OptimisticEdit, ToggleKey, ToggleOutcome};
pub use ranking::{rank_by_counter, rank_by_field, rank_counts};
pub use reconcile::{Change, Reconciler};
pub use record::{Origin, Record};
pub use view::{LiveView, ViewSpec};

/// Type aliases for clarity
pub type RecordId = String;
pub type LocalId = String;
pub type ScopeKey = String;
pub type CounterKey = String;
pub type UserId = String;
pub type NodeId = String;
/// Milliseconds since the Unix epoch
pub type Timestamp = i64;
