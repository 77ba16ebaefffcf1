//! # fleetsync store
//!
//! Storage abstraction for device records. Provides a trait-based interface
//! with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The sync driver writes every inbound status through the [`Store`]
//! trait, so it never depends on a particular backend. The primary
//! implementation is [`SqliteStore`], with [`MemoryStore`] for tests.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage
//! - [`DeviceRecord`] - Authoritative record for one device
//! - [`StatusUpdate`] - Result of writing an inbound status
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fleetsync_core::{DeviceStatus, OrgId, ResourceId};
//! use fleetsync_store::{SqliteStore, StatusUpdate, Store};
//!
//! async fn example() {
//!     let store = SqliteStore::open("fleet.db").unwrap();
//!
//!     let outcome = store
//!         .update_status(&OrgId::NULL, &ResourceId::new("dev-1"), &DeviceStatus::default())
//!         .await
//!         .unwrap();
//!     assert_eq!(outcome, StatusUpdate::Created);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Receive-side dedup**: a status with the same content hash as the
//!   stored one returns `Unchanged` and is not written
//! - **Versioned specs**: every spec change or deletion bumps
//!   `resource_version`, which is stamped on published spec events
//! - **Internal locking**: callers never hold a lock across writes

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{DeviceRecord, StatusUpdate, Store};
