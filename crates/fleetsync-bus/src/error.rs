//! Error types for the bus and resource clients.

use thiserror::Error;

use fleetsync_core::{EncodeError, HashError};

/// Errors raised by an event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus configuration is unusable (bad endpoint, unreadable CA).
    #[error("invalid bus configuration: {0}")]
    Config(String),

    /// The initial connection could not be established.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// A send failed at the transport level.
    #[error("transport error: {0}")]
    Transport(String),

    /// The envelope lacks what the transport needs to route it.
    #[error("cannot route envelope {id}: {reason}")]
    Unroutable { id: String, reason: String },

    /// The bus has been shut down.
    #[error("bus closed")]
    Closed,
}

/// Errors returned by the resource clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
