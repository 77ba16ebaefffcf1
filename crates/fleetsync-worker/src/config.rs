//! Worker configuration.
//!
//! Loaded from YAML. A missing file is created with the defaults so a
//! fresh install starts with something to edit.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use fleetsync_bus::BusConfig;
use fleetsync_core::OrgId;

use crate::error::{Result, WorkerError};

/// Path used when neither `--config` nor `FLEETSYNC_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "worker.yaml";

/// Store path that selects the in-memory store.
pub const MEMORY_STORE: &str = ":memory:";

/// Top-level worker configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub service: ServiceConfig,
    pub bus: BusConfig,
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Organization statuses are recorded under.
    pub org_id: OrgId,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            org_id: OrgId::NULL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path, or `:memory:`.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "fleetsync.db".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of task consumers.
    pub consumers: usize,
    /// Tasks buffered per queue before publishers wait.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            consumers: 1,
            capacity: 1024,
        }
    }
}

/// Retry policy for status writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Retries after the first failed attempt.
    pub write_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            write_retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl IngestConfig {
    pub fn with_write_retries(mut self, retries: u32) -> Self {
        self.write_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(10);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

impl WorkerConfig {
    /// Read `path`, or write the defaults there if it does not exist.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let io_err = |source| WorkerError::ConfigIo {
            path: path.to_path_buf(),
            source,
        };

        if !path.exists() {
            let config = Self::default();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            std::fs::write(path, serde_yaml::to_string(&config)?).map_err(io_err)?;
            info!(path = %path.display(), "wrote default configuration");
            return Ok(config);
        }

        let text = std::fs::read_to_string(path).map_err(io_err)?;
        let config: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&text)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue.consumers == 0 {
            return Err(WorkerError::Config("queue.consumers must be at least 1".into()));
        }
        if self.queue.capacity == 0 {
            return Err(WorkerError::Config("queue.capacity must be at least 1".into()));
        }
        if self.store.path.is_empty() {
            return Err(WorkerError::Config("store.path must not be empty".into()));
        }
        Ok(())
    }
}
