//! # fleetsync testkit
//!
//! Testing utilities for fleetsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: an in-memory fleet (network, store, clients) with
//!   deterministic clocks and event ids
//! - **Generators**: Proptest strategies for devices, specs, and statuses
//! - **Recording handler**: a subscriber that forwards what it sees to a
//!   channel
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use fleetsync_core::status_hash;
//! use fleetsync_testkit::generators::{device_from_params, DeviceParams};
//!
//! proptest! {
//!     #[test]
//!     fn status_hash_is_deterministic(params: DeviceParams) {
//!         let a = device_from_params(&params);
//!         let b = device_from_params(&params);
//!         prop_assert_eq!(status_hash(&a).unwrap(), status_hash(&b).unwrap());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use fleetsync_testkit::fixtures::{status_device, TestFixture};
//!
//! async fn example() {
//!     let fixture = TestFixture::new();
//!     let agent = fixture.agent("dev-1");
//!     agent.publish_status(&status_device("dev-1", "1")).await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    deterministic_options, epoch, recording_handler, spec, spec_device, status, status_device,
    FixedClock, Recorded, RecordingHandler, SequentialIds, TestFixture,
};
pub use generators::{device_from_params, DeviceParams};
