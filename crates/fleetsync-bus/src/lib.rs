//! # fleetsync bus
//!
//! Event transport and the role clients that speak the fleet protocol over
//! it.
//!
//! ## Overview
//!
//! A source (the management plane) publishes device specs and receives
//! device statuses. An agent (one per device) publishes its status and
//! receives its own spec. Both are the same generic [`ResourceClient`] with
//! the directions swapped by [`Role`].
//!
//! ## Key Properties
//!
//! - **At-least-once**: the bus may redeliver; receivers dedup by status hash
//! - **Ordered per subscription**: events are handled one at a time
//! - **Self-healing**: a transport reconnect re-announces listed resources
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fleetsync_bus::{AgentClient, ClientOptions, MemoryNetwork, SourceClient};
//! use fleetsync_core::{Device, DeviceSpec};
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let source: SourceClient = SourceClient::with_bus(
//!         Arc::new(network.connect("fleetsync")),
//!         ClientOptions::default(),
//!     );
//!     let _agent: AgentClient = AgentClient::with_bus(
//!         "dev-1",
//!         Arc::new(network.connect("dev-1")),
//!         ClientOptions::default(),
//!     );
//!
//!     let device = Device::with_spec("dev-1", "1", DeviceSpec::new("1"));
//!     source.publish_spec(&device).await.unwrap();
//! }
//! ```
//!
//! ## Topics
//!
//! ```text
//! Source                  broker                    Agent (dev-1)
//!   |-- <prefix>/dev-1/spec ----->|---------------------->|
//!   |<----------------------------|<-- <prefix>/dev-1/status
//! ```

pub mod agent;
pub mod client;
pub mod error;
pub mod handler;
pub mod mqtt;
pub mod source;
pub mod transport;

pub use agent::AgentClient;
pub use client::{ClientOptions, PublishOutcome, ResourceClient, Role, StatusHashFn};
pub use error::{BusError, ClientError, Result};
pub use handler::ResourceHandler;
pub use mqtt::{BusConfig, Endpoint, MqttBus};
pub use source::{SourceClient, SOURCE_ID};
pub use transport::{
    memory::MemoryBus, memory::MemoryNetwork, memory::PublishedEvent, BusEvent, Delivery, EventBus,
    EventFilter, Router, Subscription,
};
