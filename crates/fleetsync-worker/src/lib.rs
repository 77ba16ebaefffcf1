//! # fleetsync worker
//!
//! The synchronization driver: receives device statuses from the fleet,
//! records them, and pushes specs back to devices that fall behind.
//!
//! ## Overview
//!
//! - [`StatusIngest`] is subscribed to every device's status. It writes
//!   each status to the store with bounded retries.
//! - A changed status enqueues a [`Task::ReconcileDeviceStatus`]. A device
//!   whose rendered version lags its record gets a
//!   [`Task::PublishDeviceSpec`].
//! - [`WorkerServer::run`] ties it together and shuts down on
//!   cancellation, draining queued tasks first.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fleetsync_bus::{ClientOptions, MemoryNetwork, SourceClient};
//! use fleetsync_worker::{MemoryQueueProvider, WorkerConfig, WorkerServer};
//! use fleetsync_store::MemoryStore;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let source = SourceClient::with_bus(Arc::new(network.connect("fleetsync")), ClientOptions::default());
//!     let server = WorkerServer::new(
//!         WorkerConfig::default(),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(MemoryQueueProvider::new(1024)),
//!         source,
//!     )
//!     .unwrap();
//!
//!     let cancel = CancellationToken::new();
//!     server.run(cancel).await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod queues;
pub mod server;
pub mod shutdown;
pub mod tasks;

pub use config::{IngestConfig, QueueConfig, ServiceConfig, StoreConfig, WorkerConfig};
pub use error::{QueueError, Result, WorkerError};
pub use ingest::StatusIngest;
pub use queues::{MemoryQueueProvider, Publisher, QueueHandler, QueueProvider, TASK_QUEUE};
pub use server::{open_store, WorkerServer};
pub use tasks::{launch_consumers, CallbackManager, DeviceSyncConsumer, Task, TaskOutcome};
