//! Domain actions on mounted views.
//!
//! Each action plans its optimistic edit against the view state at the
//! moment the actor handles it, so checks like "has this user already liked
//! the artwork" never race with feed events.

use std::path::Path;

use arthub_engine::{
    Entity, LiveView, LocalId, Record, ScopeKey, Timestamp, ToggleKey, ToggleOutcome,
};
use serde_json::{json, Map, Value};

use crate::backend::ObjectStore;
use crate::binder::{Planned, ViewHandle};
use crate::error::{Result, SyncError};

/// Bucket artwork images are uploaded to.
pub const ARTWORK_BUCKET: &str = "artwork-images";

fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

fn expect_entity(view: &LiveView, entity: Entity, action: &str) -> Result<()> {
    if view.entity() != entity {
        return Err(SyncError::InvalidAction(format!(
            "{} needs a {} view, not {}",
            action,
            entity,
            view.entity()
        )));
    }
    Ok(())
}

/// The parent the view is scoped to.
fn scoped_parent(view: &LiveView, action: &str) -> Result<ScopeKey> {
    view.scope().key().cloned().ok_or_else(|| {
        SyncError::InvalidAction(format!("{} needs a view scoped to one parent", action))
    })
}

fn non_empty(text: &str, what: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SyncError::InvalidAction(format!("{} is empty", what)));
    }
    Ok(text.to_string())
}

/// Object path for an uploaded artwork image.
pub fn artwork_object_path(user: &str, file_name: &str, millis: Timestamp) -> String {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "bin".to_string());
    format!("artworks/{}-{}.{}", user, millis, extension)
}

impl ViewHandle {
    /// Like the view's artwork, or remove the like if `user` already has one.
    ///
    /// While an earlier toggle by the same user is still pending the request
    /// is coalesced into it.
    pub async fn toggle_like(&self, user: &str) -> Result<ToggleOutcome> {
        let user = user.to_string();
        self.apply_one(move |view| {
            expect_entity(view, Entity::Likes, "toggle_like")?;
            let artwork = scoped_parent(view, "toggle_like")?;
            let key = ToggleKey::new(user.clone(), artwork.clone());

            let existing = view
                .authored_by(&user, &artwork)
                .and_then(|like| like.id.clone());
            let planned = match existing {
                Some(id) => Planned::delete(id),
                None => Planned::insert(Record::placeholder(
                    Some(artwork.as_str()),
                    user,
                    now_millis(),
                    json!({}),
                )),
            };
            Ok(planned.toggled(key))
        })
        .await
    }

    pub async fn post_comment(&self, user: &str, content: &str) -> Result<LocalId> {
        let user = user.to_string();
        let content = non_empty(content, "comment")?;
        self.insert_under(Entity::Comments, "post_comment", move |artwork| {
            Record::placeholder(Some(artwork), user, now_millis(), json!({ "content": content }))
        })
        .await
    }

    pub async fn send_message(&self, user: &str, content: &str) -> Result<LocalId> {
        let user = user.to_string();
        let content = non_empty(content, "message")?;
        self.insert_under(Entity::Messages, "send_message", move |conversation| {
            Record::placeholder(
                Some(conversation),
                user,
                now_millis(),
                json!({ "content": content, "read": false }),
            )
        })
        .await
    }

    /// Mark every unread message from someone else as read.
    pub async fn mark_read(&self, reader: &str) -> Result<Vec<LocalId>> {
        let reader = reader.to_string();
        let outcomes = self
            .apply(move |view| {
                expect_entity(view, Entity::Messages, "mark_read")?;
                view.records()
                    .iter()
                    .filter(|m| m.id.is_some() && m.author_id != reader)
                    .filter(|m| m.field("read").and_then(Value::as_bool) != Some(true))
                    .map(|m| Planned::update(m, json!({ "read": true })))
                    .collect()
            })
            .await?;
        Ok(outcomes.into_iter().map(|o| o.local_id().clone()).collect())
    }

    /// Submit an artwork to the view's open call. One submission per user.
    pub async fn submit_to_open_call(
        &self,
        user: &str,
        artwork_id: &str,
        statement: &str,
    ) -> Result<LocalId> {
        let user = user.to_string();
        let payload = json!({
            "artwork_id": artwork_id,
            "statement": statement.trim(),
            "status": "pending",
        });
        let outcome = self
            .apply_one(move |view| {
                expect_entity(view, Entity::OpenCallSubmissions, "submit_to_open_call")?;
                let open_call = scoped_parent(view, "submit_to_open_call")?;
                if view.authored_by(&user, &open_call).is_some() {
                    return Err(SyncError::InvalidAction(format!(
                        "{} already submitted to open call {}",
                        user, open_call
                    )));
                }
                Ok(Planned::insert(Record::placeholder(
                    Some(open_call.as_str()),
                    user,
                    now_millis(),
                    payload,
                )))
            })
            .await?;
        Ok(outcome.local_id().clone())
    }

    /// Delete a record the view holds.
    pub async fn delete(&self, id: &str) -> Result<LocalId> {
        let outcome = self.mutate(Planned::delete(id)).await?;
        Ok(outcome.local_id().clone())
    }

    /// Merge `patch` into a record the view holds.
    pub async fn update(&self, id: &str, patch: Value) -> Result<LocalId> {
        if !patch.is_object() {
            return Err(SyncError::InvalidAction("patch must be an object".into()));
        }
        let id = id.to_string();
        let outcome = self
            .apply_one(move |view| {
                let current = view
                    .get(&id)
                    .ok_or_else(|| arthub_engine::Error::RecordNotFound(id.clone()))?;
                Planned::update(current, patch)
            })
            .await?;
        Ok(outcome.local_id().clone())
    }

    /// Upload an artwork image, then show the artwork immediately and insert
    /// it with the image's public URL.
    ///
    /// A failed upload creates no edit.
    pub async fn upload_artwork(
        &self,
        objects: &dyn ObjectStore,
        user: &str,
        file_name: &str,
        bytes: Vec<u8>,
        fields: Value,
    ) -> Result<LocalId> {
        if self.entity() != Entity::Artworks {
            return Err(SyncError::InvalidAction(format!(
                "upload_artwork needs a {} view, not {}",
                Entity::Artworks,
                self.entity()
            )));
        }
        let mut payload: Map<String, Value> = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(SyncError::InvalidAction("artwork fields must be an object".into())),
        };

        let created_at = now_millis();
        let path = artwork_object_path(user, file_name, created_at);
        let url = objects.upload(ARTWORK_BUCKET, &path, bytes).await?;
        tracing::info!(user, %url, "Artwork image uploaded");
        payload.insert("image_url".into(), Value::String(url));

        let record = Record::placeholder(Some(user), user, created_at, Value::Object(payload));
        let outcome = self.mutate(Planned::insert(record)).await?;
        Ok(outcome.local_id().clone())
    }

    async fn insert_under<F>(&self, entity: Entity, action: &'static str, build: F) -> Result<LocalId>
    where
        F: FnOnce(&str) -> Record + Send + 'static,
    {
        let outcome = self
            .apply_one(move |view| {
                expect_entity(view, entity, action)?;
                let parent = scoped_parent(view, action)?;
                Ok(Planned::insert(build(&parent)))
            })
            .await?;
        Ok(outcome.local_id().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_uses_lowercase_extension() {
        assert_eq!(
            artwork_object_path("u1", "Sunset.PNG", 1_700_000_000_000),
            "artworks/u1-1700000000000.png"
        );
        assert_eq!(
            artwork_object_path("u1", "noext", 5),
            "artworks/u1-5.bin"
        );
    }

    #[test]
    fn blank_text_is_rejected() {
        assert!(non_empty("   ", "comment").is_err());
        assert_eq!(non_empty("  hi ", "comment").unwrap(), "hi");
    }
}
