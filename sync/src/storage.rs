//! Directory-backed object store.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::backend::ObjectStore;
use crate::config::SyncConfig;
use crate::error::{StoreError, StoreResult};

/// Image types accepted for upload.
const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// Stores objects as files under `root/{bucket}/{path}`.
#[derive(Debug, Clone)]
pub struct DirObjectStore {
    root: PathBuf,
    public_url: String,
    max_bytes: usize,
}

impl DirObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_url: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.into(),
            max_bytes,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.storage_dir.clone(),
            config.public_url.clone(),
            config.max_upload_bytes,
        )
    }

    fn check(&self, bucket: &str, path: &str, size: usize) -> StoreResult<PathBuf> {
        if size == 0 {
            return Err(StoreError::Rejected("empty upload".into()));
        }
        if size > self.max_bytes {
            return Err(StoreError::Rejected(format!(
                "upload of {} bytes exceeds the {} byte limit",
                size, self.max_bytes
            )));
        }

        let relative = Path::new(bucket).join(path);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if bucket.is_empty() || path.is_empty() || !plain {
            return Err(StoreError::Rejected(format!("invalid object path {}/{}", bucket, path)));
        }

        let extension = relative
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(StoreError::Rejected(format!(
                "file type {:?} is not allowed",
                extension
            )));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for DirObjectStore {
    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> StoreResult<String> {
        let target = self.check(bucket, path, bytes.len())?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::debug!(bucket, path, bytes = bytes.len(), "Stored object");
        Ok(format!(
            "{}/{}/{}",
            self.public_url.trim_end_matches('/'),
            bucket,
            path
        ))
    }
}
