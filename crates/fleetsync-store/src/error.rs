//! Store errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Database(#[from] rusqlite::Error),

    /// A spec or status payload could not be encoded, decoded or hashed.
    #[error("payload encoding: {0}")]
    Serialization(String),

    #[error("no device record for {0}")]
    NotFound(String),

    /// A persisted column holds a value the record type cannot represent.
    #[error("corrupt device record: {0}")]
    InvalidData(String),

    #[error("schema migration: {0}")]
    Migration(String),

    /// The blocking database task panicked, was cancelled, or found its
    /// connection lock poisoned.
    #[error("storage task: {0}")]
    Task(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<fleetsync_core::HashError> for StoreError {
    fn from(e: fleetsync_core::HashError) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
