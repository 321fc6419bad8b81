//! Unified error handling for the sync layer.

use std::time::Duration;

use crate::config::ConfigError;

/// Failure reported by an external collaborator (store, feed, object store).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("42501") => StoreError::PermissionDenied(db.message().to_string()),
                Some(code) if code.starts_with("23") => {
                    StoreError::Constraint(db.message().to_string())
                }
                _ => StoreError::Rejected(db.message().to_string()),
            },
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => StoreError::Network(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Rejected(err.to_string()),
        }
    }
}

/// Sync layer error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Engine error: {0}")]
    Engine(#[from] arthub_engine::Error),

    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    #[error("View is unmounted")]
    Unmounted,

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for collaborator calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
