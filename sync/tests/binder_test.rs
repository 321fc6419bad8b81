//! Integration tests for mounted views.
//!
//! Every test runs against the in-memory backend, which publishes a change
//! for each write the way the hosted store does.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arthub_engine::{Entity, RawChange, Scope, ToggleOutcome, ViewSpec};
use arthub_sync::{
    ChangeFeedService, ChangeStream, FeedFilter, MemoryBackend, StaticIdentity, StoreError,
    StoreResult, SyncConfig, SyncError, ViewBinder, ViewHandle, ViewNotice, ViewSnapshot,
    ViewStatus,
};
use async_trait::async_trait;
use serde_json::{json, Value};

fn config() -> SyncConfig {
    SyncConfig {
        write_timeout: Duration::from_secs(2),
        resubscribe_backoff: Duration::from_millis(10),
        ..SyncConfig::default()
    }
}

fn binder_with(backend: &MemoryBackend, config: SyncConfig) -> ViewBinder {
    ViewBinder::new(
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        Arc::new(StaticIdentity::new("me")),
        &config,
    )
}

fn binder(backend: &MemoryBackend) -> ViewBinder {
    binder_with(backend, config())
}

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held");
}

/// Mount `spec` and wait until it is fetched and its feed is connected.
async fn mounted(binder: &ViewBinder, backend: &MemoryBackend, spec: ViewSpec) -> ViewHandle {
    let before = backend.subscriber_count();
    let view = binder.mount(spec);
    eventually(|| backend.subscriber_count() > before).await;
    within(view.wait_for(ViewSnapshot::is_ready))
        .await
        .unwrap();
    view
}

async fn settled(view: &ViewHandle, mut ready: impl FnMut(&ViewSnapshot) -> bool) -> ViewSnapshot {
    within(view.wait_for(move |s| s.pending == 0 && ready(s)))
        .await
        .unwrap()
}

/// A feed service that takes `delay` to start listening, like a listener
/// connection being opened.
struct SlowFeed {
    backend: MemoryBackend,
    delay: Duration,
}

#[async_trait]
impl ChangeFeedService for SlowFeed {
    async fn subscribe(
        &self,
        entity: Entity,
        filter: Option<FeedFilter>,
    ) -> StoreResult<ChangeStream> {
        tokio::time::sleep(self.delay).await;
        self.backend.subscribe(entity, filter).await
    }
}

fn comment(id: &str, artwork: &str, user: &str, at: i64) -> Value {
    json!({"id": id, "artwork_id": artwork, "user_id": user, "content": id, "created_at": at})
}

fn like(id: &str, artwork: &str, user: &str, at: i64) -> Value {
    json!({"id": id, "artwork_id": artwork, "user_id": user, "created_at": at})
}

fn ids(snapshot: &ViewSnapshot) -> Vec<String> {
    snapshot
        .records
        .iter()
        .map(|r| r.id.clone().unwrap_or_default())
        .collect()
}

#[cfg(test)]
mod feed_tests {
    use super::*;
    use arthub_sync::DataStore;

    #[tokio::test]
    async fn test_mount_fetches_then_follows_feed() {
        let backend = MemoryBackend::new();
        backend.seed(Entity::Comments, comment("c1", "art-1", "ana", 1000));
        backend.seed(Entity::Comments, comment("other", "art-2", "ana", 1001));
        let binder = binder(&backend);

        let view = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;
        let snapshot = view.snapshot();
        assert_eq!(ids(&snapshot), vec!["c1"]);
        assert_eq!(snapshot.counter("art-1"), 1);

        backend
            .insert(
                Entity::Comments,
                json!({"user_id": "bo", "artwork_id": "art-1", "content": "second"}),
            )
            .await
            .unwrap();

        let snapshot = within(view.wait_for(|s| s.records.len() == 2)).await.unwrap();
        assert_eq!(snapshot.records[1].payload["content"], "second");
        assert_eq!(snapshot.counter("art-1"), 2);
    }

    #[tokio::test]
    async fn test_writes_while_feed_connects_are_not_lost() {
        let backend = MemoryBackend::new();
        let binder = ViewBinder::new(
            Arc::new(backend.clone()),
            Arc::new(SlowFeed {
                backend: backend.clone(),
                delay: Duration::from_millis(100),
            }),
            Arc::new(StaticIdentity::new("me")),
            &config(),
        );

        let view = binder.mount(ViewSpec::comments("art-1"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        backend
            .insert(
                Entity::Comments,
                json!({"user_id": "bo", "artwork_id": "art-1", "content": "early"}),
            )
            .await
            .unwrap();

        let snapshot = within(view.wait_for(ViewSnapshot::is_ready)).await.unwrap();
        assert_eq!(snapshot.records.len(), 1);

        backend
            .insert(
                Entity::Comments,
                json!({"user_id": "bo", "artwork_id": "art-1", "content": "later"}),
            )
            .await
            .unwrap();
        let snapshot = within(view.wait_for(|s| s.records.len() == 2)).await.unwrap();
        assert_eq!(snapshot.counter("art-1"), 2);
        assert_eq!(backend.rows(Entity::Comments).len(), 2);
    }

    #[tokio::test]
    async fn test_late_older_record_lands_in_order() {
        let backend = MemoryBackend::new();
        backend.seed(Entity::Comments, comment("c2", "art-1", "ana", 2000));
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;

        backend.emit(RawChange::insert(
            Entity::Comments,
            comment("c1", "art-1", "bo", 1000),
        ));

        let snapshot = within(view.wait_for(|s| s.records.len() == 2)).await.unwrap();
        assert_eq!(ids(&snapshot), vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_ignored() {
        let backend = MemoryBackend::new();
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;

        let change = RawChange::insert(Entity::Comments, comment("c1", "art-1", "ana", 1000));
        backend.emit(change.clone());
        backend.emit(change);
        backend.emit(RawChange::insert(
            Entity::Comments,
            comment("c2", "art-1", "ana", 2000),
        ));

        let snapshot = within(view.wait_for(|s| s.get("c2").is_some())).await.unwrap();
        assert_eq!(ids(&snapshot), vec!["c1", "c2"]);
        assert_eq!(snapshot.counter("art-1"), 2);
    }

    #[tokio::test]
    async fn test_resubscribe_refetches_missed_rows() {
        let backend = MemoryBackend::new();
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;

        // The row lands while the connection is down, so no event carries it
        backend.drop_connections();
        backend.seed(Entity::Comments, comment("missed", "art-1", "bo", 1000));

        let snapshot = within(view.wait_for(|s| s.is_ready() && s.records.len() == 1))
            .await
            .unwrap();
        assert_eq!(ids(&snapshot), vec!["missed"]);
        assert_eq!(snapshot.counter("art-1"), 1);
        assert_eq!(binder.feed().active_count(), 1);
    }

    #[tokio::test]
    async fn test_popular_ranking_from_all_likes() {
        let backend = MemoryBackend::new();
        for (i, artwork) in ["a", "b", "b", "c", "c", "c"].iter().enumerate() {
            backend.seed(
                Entity::Likes,
                like(&format!("l{}", i), artwork, &format!("u{}", i), i as i64),
            );
        }
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::all_likes()).await;

        assert_eq!(
            view.snapshot().popular(2),
            vec![("c".to_string(), 3), ("b".to_string(), 2)]
        );
    }
}

#[cfg(test)]
mod optimistic_tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_like_rolls_back_counter() {
        let backend = MemoryBackend::new();
        for (id, user) in [("l1", "a"), ("l2", "b"), ("l3", "c")] {
            backend.seed(Entity::Likes, like(id, "art-1", user, 100));
        }
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::likes("art-1")).await;
        let mut notices = view.take_notices().unwrap();
        assert_eq!(view.snapshot().counter("art-1"), 3);

        backend.set_write_delay(Some(Duration::from_millis(100)));
        backend.fail_next_write(StoreError::Network("connection reset".into()));

        let outcome = view.toggle_like("me").await.unwrap();
        let liked = within(view.wait_for(|s| s.counter("art-1") == 4)).await.unwrap();
        assert!(liked.records.iter().any(|r| r.author_id == "me"));

        match within(notices.recv()).await.unwrap() {
            ViewNotice::WriteFailed { local_id, error } => {
                assert_eq!(&local_id, outcome.local_id());
                assert!(matches!(error, SyncError::Store(StoreError::Network(_))));
            }
            other => panic!("unexpected notice {:?}", other),
        }

        let snapshot = settled(&view, |s| s.counter("art-1") == 3).await;
        assert!(!snapshot.records.iter().any(|r| r.author_id == "me"));
        assert!(backend.rows(Entity::Likes).iter().all(|r| r["user_id"] != "me"));
    }

    #[tokio::test]
    async fn test_repeated_toggle_is_coalesced() {
        let backend = MemoryBackend::new();
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::likes("art-1")).await;

        backend.set_write_delay(Some(Duration::from_millis(50)));
        let first = view.toggle_like("me").await.unwrap();
        let second = view.toggle_like("me").await.unwrap();

        assert!(matches!(first, ToggleOutcome::Applied(_)));
        assert_eq!(second, ToggleOutcome::Coalesced(first.local_id().clone()));

        let snapshot = settled(&view, |s| s.counter("art-1") == 1).await;
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(backend.rows(Entity::Likes).len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_removes_existing_like() {
        let backend = MemoryBackend::new();
        backend.seed(Entity::Likes, like("mine", "art-1", "me", 100));
        backend.seed(Entity::Likes, like("theirs", "art-1", "bo", 101));
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::likes("art-1")).await;

        view.toggle_like("me").await.unwrap();

        let snapshot = settled(&view, |s| s.counter("art-1") == 1).await;
        assert_eq!(ids(&snapshot), vec!["theirs"]);
        assert_eq!(backend.rows(Entity::Likes).len(), 1);
    }

    #[tokio::test]
    async fn test_insert_echo_replaces_placeholder() {
        let backend = MemoryBackend::new();
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;

        let local_id = view.post_comment("me", "  Lovely brushwork ").await.unwrap();
        assert!(local_id.starts_with(view.node_id().as_str()));

        let snapshot = settled(&view, |s| {
            s.records.len() == 1 && s.records[0].id.is_some()
        })
        .await;
        assert_eq!(snapshot.records[0].payload["content"], "Lovely brushwork");
        assert_eq!(snapshot.records[0].local_id.as_deref(), Some(local_id.as_str()));
        assert_eq!(snapshot.counter("art-1"), 1);
    }

    #[tokio::test]
    async fn test_echo_without_client_ref_does_not_duplicate() {
        let backend = MemoryBackend::new();
        backend.suppress_client_ref(true);
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;

        view.post_comment("me", "hello").await.unwrap();

        let snapshot = settled(&view, |s| {
            s.records.len() == 1 && s.records.iter().all(|r| r.id.is_some())
        })
        .await;
        assert_eq!(snapshot.counter("art-1"), 1);

        // Let any late echo arrive, then check nothing was added
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(view.snapshot().records.len(), 1);
    }

    #[tokio::test]
    async fn test_write_timeout_rolls_back() {
        let backend = MemoryBackend::new();
        let binder = binder_with(
            &backend,
            SyncConfig {
                write_timeout: Duration::from_millis(30),
                ..config()
            },
        );
        let view = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;
        let mut notices = view.take_notices().unwrap();

        backend.set_write_delay(Some(Duration::from_millis(500)));
        view.post_comment("me", "slow").await.unwrap();

        match within(notices.recv()).await.unwrap() {
            ViewNotice::WriteFailed { error, .. } => {
                assert!(matches!(error, SyncError::Timeout(_)));
            }
            other => panic!("unexpected notice {:?}", other),
        }
        let snapshot = settled(&view, |s| s.records.is_empty()).await;
        assert_eq!(snapshot.counter("art-1"), 0);
    }

    #[tokio::test]
    async fn test_permission_denied_is_reported() {
        let backend = MemoryBackend::new();
        backend.deny_writes(Entity::Comments);
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;
        let mut notices = view.take_notices().unwrap();
        assert!(view.take_notices().is_none());

        view.post_comment("me", "blocked").await.unwrap();

        match within(notices.recv()).await.unwrap() {
            ViewNotice::WriteFailed { error, .. } => assert!(matches!(
                error,
                SyncError::Store(StoreError::PermissionDenied(_))
            )),
            other => panic!("unexpected notice {:?}", other),
        }
        settled(&view, |s| s.records.is_empty()).await;
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let backend = MemoryBackend::new();
        backend.seed(Entity::Comments, comment("c1", "art-1", "me", 1000));
        backend.seed(Entity::Comments, comment("c2", "art-1", "me", 2000));
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;

        view.update("c1", json!({"content": "edited"})).await.unwrap();
        view.delete("c2").await.unwrap();

        let snapshot = settled(&view, |s| {
            s.records.len() == 1 && s.records[0].payload["content"] == "edited"
        })
        .await;
        assert!(snapshot.records[0].updated_at.is_some());
        assert_eq!(snapshot.counter("art-1"), 1);

        let rows = backend.rows(Entity::Comments);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["content"], "edited");

        let err = view.update("missing", json!({"content": "x"})).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Engine(arthub_engine::Error::RecordNotFound(_))
        ));
    }
}

#[cfg(test)]
mod action_tests {
    use super::*;
    use arthub_sync::ARTWORK_BUCKET;

    #[tokio::test]
    async fn test_mark_read_clears_unread_badge() {
        let backend = MemoryBackend::new();
        for (id, user, at) in [("m1", "bo", 1), ("m2", "me", 2), ("m3", "bo", 3)] {
            backend.seed(
                Entity::Messages,
                json!({
                    "id": id,
                    "conversation_id": "conv-1",
                    "user_id": user,
                    "content": id,
                    "read": false,
                    "created_at": at,
                }),
            );
        }
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::conversation("conv-1", "me")).await;
        assert_eq!(view.snapshot().counter("conv-1"), 2);

        let edits = view.mark_read("me").await.unwrap();
        assert_eq!(edits.len(), 2);

        settled(&view, |s| s.counter("conv-1") == 0).await;
        for row in backend.rows(Entity::Messages) {
            let expect_read = row["user_id"] == "bo";
            assert_eq!(row["read"] == json!(true), expect_read);
        }
    }

    #[tokio::test]
    async fn test_send_message_is_not_unread_for_sender() {
        let backend = MemoryBackend::new();
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::conversation("conv-1", "me")).await;

        view.send_message("me", "hi there").await.unwrap();

        let snapshot = settled(&view, |s| {
            s.records.len() == 1 && s.records[0].id.is_some()
        })
        .await;
        assert_eq!(snapshot.counter("conv-1"), 0);
    }

    #[tokio::test]
    async fn test_submit_once_per_open_call() {
        let backend = MemoryBackend::new();
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::submissions("call-1")).await;

        view.submit_to_open_call("me", "art-9", "My best work")
            .await
            .unwrap();
        let snapshot = settled(&view, |s| s.counter("call-1") == 1).await;
        assert_eq!(snapshot.records[0].payload["artwork_id"], "art-9");
        assert_eq!(snapshot.records[0].payload["status"], "pending");

        let err = view
            .submit_to_open_call("me", "art-10", "Another")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidAction(_)));
    }

    #[tokio::test]
    async fn test_upload_artwork_inserts_with_image_url() {
        let backend = MemoryBackend::new();
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::new_artworks()).await;

        view.upload_artwork(
            &backend,
            "ana",
            "Sunset.PNG",
            vec![1, 2, 3],
            json!({"title": "Sunset"}),
        )
        .await
        .unwrap();

        let snapshot = settled(&view, |s| {
            s.records.len() == 1 && s.records[0].id.is_some()
        })
        .await;
        let artwork = &snapshot.records[0];
        assert_eq!(artwork.payload["title"], "Sunset");
        assert_eq!(artwork.author_id, "ana");

        let url = artwork.payload["image_url"].as_str().unwrap();
        let prefix = format!("memory://{}/", ARTWORK_BUCKET);
        let path = url.strip_prefix(&prefix).unwrap();
        assert!(path.starts_with("artworks/ana-") && path.ends_with(".png"));
        assert_eq!(backend.object(ARTWORK_BUCKET, path), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_failed_upload_creates_no_edit() {
        let backend = MemoryBackend::new();
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::new_artworks()).await;

        let err = view
            .upload_artwork(&backend, "ana", "empty.png", vec![], Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::Rejected(_))));
        assert_eq!(view.snapshot().pending, 0);
        assert!(backend.rows(Entity::Artworks).is_empty());
    }

    #[tokio::test]
    async fn test_actions_check_the_view() {
        let backend = MemoryBackend::new();
        let binder = binder(&backend);
        let comments = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;
        let all_likes = mounted(&binder, &backend, ViewSpec::all_likes()).await;

        assert!(matches!(
            comments.toggle_like("me").await,
            Err(SyncError::InvalidAction(_))
        ));
        assert!(matches!(
            all_likes.toggle_like("me").await,
            Err(SyncError::InvalidAction(_))
        ));
        assert!(matches!(
            comments.post_comment("me", "   ").await,
            Err(SyncError::InvalidAction(_))
        ));
        assert_eq!(comments.snapshot().pending, 0);
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;
    use arthub_sync::DataStore;

    #[tokio::test]
    async fn test_events_during_fetch_are_replayed() {
        let backend = MemoryBackend::new();
        backend.seed(Entity::Comments, comment("c1", "art-1", "ana", 1000));
        backend.seed(Entity::Comments, comment("c2", "art-1", "ana", 1001));
        backend.set_query_delay(Some(Duration::from_millis(300)));
        let binder = binder(&backend);

        let view = binder.mount(ViewSpec::comments("art-1"));
        eventually(|| backend.subscriber_count() == 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        backend
            .insert(
                Entity::Comments,
                json!({"user_id": "bo", "artwork_id": "art-1", "content": "during"}),
            )
            .await
            .unwrap();
        backend.delete(Entity::Comments, "c1").await.unwrap();

        let snapshot = within(view.wait_for(ViewSnapshot::is_ready)).await.unwrap();
        assert_eq!(snapshot.records.len(), 2);
        assert!(snapshot.get("c1").is_none());
        assert!(snapshot.get("c2").is_some());
        assert!(snapshot.records.iter().any(|r| r.payload["content"] == "during"));
        assert_eq!(snapshot.counter("art-1"), 2);
    }

    #[tokio::test]
    async fn test_events_are_replayed_after_failed_fetch() {
        let backend = MemoryBackend::new();
        backend.fail_next_queries(1);
        backend.set_query_delay(Some(Duration::from_millis(300)));
        let binder = binder(&backend);

        let view = binder.mount(ViewSpec::comments("art-1"));
        eventually(|| backend.subscriber_count() == 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        backend
            .insert(
                Entity::Comments,
                json!({"user_id": "bo", "artwork_id": "art-1", "content": "during"}),
            )
            .await
            .unwrap();

        let failed = within(view.wait_for(|s| matches!(s.status, ViewStatus::Failed(_))))
            .await
            .unwrap();
        assert_eq!(failed.records.len(), 1);
        assert_eq!(failed.counter("art-1"), 1);
    }

    #[tokio::test]
    async fn test_rescope_drops_buffered_events() {
        let backend = MemoryBackend::new();
        backend.seed(Entity::Comments, comment("two", "art-2", "ana", 1000));
        backend.set_query_delay(Some(Duration::from_millis(300)));
        let binder = binder(&backend);

        let view = binder.mount(ViewSpec::comments("art-1"));
        eventually(|| backend.subscriber_count() == 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        // buffered while the first fetch runs; never applied to art-2
        backend.emit(RawChange::delete(Entity::Comments, json!({"id": "two"})));
        tokio::time::sleep(Duration::from_millis(30)).await;

        view.rescope(Scope::parent("art-2")).unwrap();
        let snapshot = within(view.wait_for(|s| {
            s.scope == Scope::parent("art-2") && s.is_ready()
        }))
        .await
        .unwrap();
        assert_eq!(ids(&snapshot), vec!["two"]);
        assert_eq!(snapshot.counter("art-2"), 1);
    }

    #[tokio::test]
    async fn test_unmount_is_idempotent_and_releases_subscription() {
        let backend = MemoryBackend::new();
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;
        assert_eq!(binder.feed().active_count(), 1);

        view.unmount().await;
        assert_eq!(binder.feed().active_count(), 0);
        assert!(!view.is_mounted());

        view.unmount().await;
        assert_eq!(binder.feed().active_count(), 0);
        assert!(matches!(view.refetch(), Err(SyncError::Unmounted)));
        assert!(matches!(
            view.post_comment("me", "late").await,
            Err(SyncError::Unmounted)
        ));
    }

    #[tokio::test]
    async fn test_dropping_last_handle_unmounts() {
        let backend = MemoryBackend::new();
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::likes("art-1")).await;
        let clone = view.clone();

        drop(view);
        assert_eq!(binder.feed().active_count(), 1);
        drop(clone);

        eventually(|| binder.feed().active_count() == 0).await;
    }

    #[tokio::test]
    async fn test_unmount_abandons_pending_writes() {
        let backend = MemoryBackend::new();
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;

        backend.set_write_delay(Some(Duration::from_millis(50)));
        view.post_comment("me", "in flight").await.unwrap();
        view.unmount().await;

        // The write itself still lands
        eventually(|| backend.rows(Entity::Comments).len() == 1).await;
        assert_eq!(binder.feed().active_count(), 0);
    }

    #[tokio::test]
    async fn test_rescope_switches_collection() {
        let backend = MemoryBackend::new();
        backend.seed(Entity::Comments, comment("one", "art-1", "ana", 1000));
        backend.seed(Entity::Comments, comment("two", "art-2", "ana", 1001));
        let binder = binder(&backend);
        let view = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;
        assert_eq!(ids(&view.snapshot()), vec!["one"]);

        view.rescope(Scope::parent("art-2")).unwrap();
        let snapshot = within(view.wait_for(|s| {
            s.scope == Scope::parent("art-2") && s.is_ready()
        }))
        .await
        .unwrap();
        assert_eq!(ids(&snapshot), vec!["two"]);
        assert_eq!(snapshot.counter("art-1"), 0);
        assert_eq!(snapshot.counter("art-2"), 1);
        assert_eq!(binder.feed().active_count(), 1);
        assert_eq!(binder.feed().active()[0].scope, Scope::parent("art-2"));

        // Events for the old scope no longer reach the view
        backend.emit(RawChange::insert(
            Entity::Comments,
            comment("stale", "art-1", "bo", 2000),
        ));
        backend.emit(RawChange::insert(
            Entity::Comments,
            comment("fresh", "art-2", "bo", 2001),
        ));
        let snapshot = within(view.wait_for(|s| s.get("fresh").is_some()))
            .await
            .unwrap();
        assert_eq!(ids(&snapshot), vec!["two", "fresh"]);
    }

    #[tokio::test]
    async fn test_failed_fetch_can_be_retried() {
        let backend = MemoryBackend::new();
        backend.seed(Entity::Comments, comment("c1", "art-1", "ana", 1000));
        backend.fail_next_queries(1);
        let binder = binder(&backend);

        let view = binder.mount(ViewSpec::comments("art-1"));
        let mut notices = view.take_notices().unwrap();

        let failed = within(view.wait_for(|s| matches!(s.status, ViewStatus::Failed(_))))
            .await
            .unwrap();
        assert!(failed.records.is_empty());
        assert!(matches!(
            within(notices.recv()).await.unwrap(),
            ViewNotice::FetchFailed {
                error: StoreError::Unavailable(_)
            }
        ));

        view.refetch().unwrap();
        let snapshot = within(view.wait_for(ViewSnapshot::is_ready)).await.unwrap();
        assert_eq!(ids(&snapshot), vec!["c1"]);
    }

    #[tokio::test]
    async fn test_fetch_limit_applies_to_unlimited_specs() {
        let backend = MemoryBackend::new();
        for i in 0..5 {
            backend.seed(
                Entity::Comments,
                comment(&format!("c{}", i), "art-1", "ana", 1000 + i),
            );
        }
        let binder = binder_with(
            &backend,
            SyncConfig {
                fetch_limit: 3,
                ..config()
            },
        );

        let view = mounted(&binder, &backend, ViewSpec::comments("art-1")).await;
        assert_eq!(view.spec().limit, Some(3));
        assert_eq!(view.snapshot().records.len(), 3);

        let explicit = mounted(
            &binder,
            &backend,
            ViewSpec::comments("art-1").with_limit(10),
        )
        .await;
        assert_eq!(explicit.snapshot().records.len(), 5);
    }

    #[tokio::test]
    async fn test_identity_is_exposed() {
        let backend = MemoryBackend::new();
        let binder = binder(&backend);
        let view = binder.mount(ViewSpec::likes("art-1"));
        assert_eq!(binder.current_user().as_deref(), Some("me"));
        assert_eq!(view.require_user().unwrap(), "me");

        let anonymous = ViewBinder::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Arc::new(StaticIdentity::anonymous()),
            &config(),
        );
        let view = anonymous.mount(ViewSpec::likes("art-1"));
        assert!(matches!(
            view.require_user(),
            Err(SyncError::InvalidAction(_))
        ));
    }
}
