use std::path::{Path, PathBuf};
use std::time::Duration;

use objreg_store::{LogConfig, LogRepository, StoreResult, SyncMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::Backoff;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level configuration, usually loaded from `objreg.toml`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub store: StoreConfig,
    pub service: ServiceConfig,
}

impl RegistryConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}

/// Where and how the durable log is kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub log_file: String,
    /// `fsync` after every write instead of relying on the page cache.
    pub sync_every_write: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("objreg-data"),
            log_file: "objreg.log".into(),
            sync_every_write: false,
        }
    }
}

impl StoreConfig {
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.log_file)
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            sync_mode: if self.sync_every_write {
                SyncMode::EveryWrite
            } else {
                SyncMode::OsDefault
            },
        }
    }

    /// Open the durable repository this config describes.
    pub fn open(&self) -> StoreResult<LogRepository> {
        LogRepository::open(&self.log_path(), self.log_config())
    }
}

/// Behavior of [`ObjectService`](crate::ObjectService).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Deadline applied to requests whose context has none (or a later one).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    /// Call the executor's delete hook after a successful delete.
    pub teardown_on_delete: bool,
    pub reconcile: ReconcileConfig,
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// When reconciliation runs relative to the storage write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Reconcile before the call returns; exhausted retries fail the call.
    #[default]
    Inline,
    /// Queue reconciliation to a background worker; the call returns once
    /// the object is persisted.
    Background,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub mode: ReconcileMode,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Attempts per reconciliation, including the first.
    pub max_attempts: u32,
    /// Bound on queued background tasks.
    pub queue_capacity: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            mode: ReconcileMode::Inline,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 20_000,
            max_attempts: 5,
            queue_capacity: 1024,
        }
    }
}

impl ReconcileConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}
