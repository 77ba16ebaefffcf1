//! Error types for the worker.

use std::path::PathBuf;

use fleetsync_bus::ClientError;
use fleetsync_store::StoreError;
use thiserror::Error;

/// Errors that can occur while building or running the worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configuration file could not be read or written.
    #[error("configuration file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for this schema.
    #[error("parsing configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Event client error.
    #[error("event client error: {0}")]
    Bus(#[from] ClientError),

    /// Task queue error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Errors raised by a queue provider.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The provider has been stopped and accepts no new work.
    #[error("queue provider stopped")]
    Stopped,

    /// The queue is at capacity and the caller chose not to wait.
    #[error("queue {0} is full")]
    Full(String),

    /// The queue was closed while publishing.
    #[error("queue {0} is closed")]
    Closed(String),

    /// A task could not be serialized.
    #[error("encoding task: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;
