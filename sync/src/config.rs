//! Configuration management for the synchronizer.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use arthub_engine::{CounterRule, Entity, Scope, UserId, ViewSpec};

/// Synchronizer configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// PostgreSQL connection URL (only needed by the Postgres backend)
    pub database_url: Option<String>,
    /// Upper bound on every authoritative write
    pub write_timeout: Duration,
    /// Base delay before a dropped feed connection is reopened
    pub resubscribe_backoff: Duration,
    /// Rows requested by an initial fetch
    pub fetch_limit: usize,
    /// Root directory of the object store
    pub storage_dir: PathBuf,
    /// Base URL objects are served from
    pub public_url: String,
    /// Largest accepted upload
    pub max_upload_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            write_timeout: Duration::from_millis(10_000),
            resubscribe_backoff: Duration::from_millis(500),
            fetch_limit: 100,
            storage_dir: PathBuf::from("./storage"),
            public_url: "http://localhost:8080/storage".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let write_timeout = parse_var(&lookup, "ARTHUB_WRITE_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.write_timeout);

        let resubscribe_backoff = parse_var(&lookup, "ARTHUB_RESUBSCRIBE_BACKOFF_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.resubscribe_backoff);

        let fetch_limit =
            parse_var(&lookup, "ARTHUB_FETCH_LIMIT")?.unwrap_or(defaults.fetch_limit);
        if fetch_limit == 0 {
            return Err(ConfigError::Invalid {
                name: "ARTHUB_FETCH_LIMIT",
                value: "0".to_string(),
            });
        }

        let max_upload_bytes =
            parse_var(&lookup, "ARTHUB_MAX_UPLOAD_BYTES")?.unwrap_or(defaults.max_upload_bytes);

        Ok(Self {
            database_url: lookup("DATABASE_URL"),
            write_timeout,
            resubscribe_backoff,
            fetch_limit,
            storage_dir: lookup("ARTHUB_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            public_url: lookup("ARTHUB_PUBLIC_URL").unwrap_or(defaults.public_url),
            max_upload_bytes,
        })
    }

    /// The database URL, required by the Postgres backend.
    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }
}

/// The view the `arthub-sync` binary watches.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchConfig {
    pub entity: Entity,
    pub scope: Scope,
    pub user_id: UserId,
}

impl WatchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let entity = match lookup("ARTHUB_WATCH_ENTITY") {
            Some(table) => Entity::from_table(&table).ok_or(ConfigError::Invalid {
                name: "ARTHUB_WATCH_ENTITY",
                value: table,
            })?,
            None => Entity::Artworks,
        };

        let scope = match lookup("ARTHUB_WATCH_SCOPE") {
            None => Scope::All,
            Some(key) if key.is_empty() || key == "*" => Scope::All,
            Some(key) => Scope::Parent(key),
        };

        let user_id = lookup("ARTHUB_USER_ID").ok_or(ConfigError::Missing("ARTHUB_USER_ID"))?;

        Ok(Self {
            entity,
            scope,
            user_id,
        })
    }

    /// The view to mount: likes, comments and submissions are counted per
    /// parent, messages by what the user has not read.
    pub fn spec(&self, fetch_limit: usize) -> ViewSpec {
        let counter = match self.entity {
            Entity::Artworks => CounterRule::None,
            Entity::Comments | Entity::Likes | Entity::OpenCallSubmissions => {
                CounterRule::PerParent
            }
            Entity::Messages => CounterRule::UnreadFor {
                reader: self.user_id.clone(),
            },
        };
        ViewSpec::new(self.entity, self.scope.clone())
            .with_counter(counter)
            .with_limit(fetch_limit)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid {name} value: {value:?}")]
    Invalid { name: &'static str, value: String },
}
