//! # fleetsync core
//!
//! Pure primitives for the fleet synchronization protocol: resources,
//! canonical content hashing, event envelopes, and the codec between them.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Resource`] - Identity, version, deletion marker, spec, and status
//! - [`ResourceKind`] - Names the event data type and payload types of a kind
//! - [`Envelope`] - Transport-neutral event with string extensions
//! - [`Codec`] - Encodes and decodes one direction (spec or status)
//! - [`ContentHash`] - Deterministic digest of a status payload
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fleetsync_core::{Codec, Device, DeviceKind, DeviceSpec, SubResource};
//!
//! let codec = Codec::<DeviceKind>::system(SubResource::Spec);
//! let device = Device::with_spec("dev-1", "3", DeviceSpec::new("3"));
//!
//! let envelope = codec.encode("fleetsync", &codec.event_type(), &device).unwrap();
//! let decoded = codec.decode(&envelope).unwrap();
//! assert_eq!(decoded.spec, device.spec);
//! ```
//!
//! ## Canonicalization
//!
//! Status hashes are computed over deterministic CBOR. See [`canonical`].

pub mod canonical;
pub mod clock;
pub mod codec;
pub mod device;
pub mod error;
pub mod event;
pub mod hash;
pub mod lister;
pub mod resource;
pub mod types;

pub use canonical::canonical_bytes;
pub use clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
pub use codec::Codec;
pub use device::{
    Condition, ConditionStatus, ConfigStatus, ContainerStatus, Device, DeviceKind, DeviceOsSpec,
    DeviceSpec, DeviceStatus, MatchPatterns, OsStatus, SystemInfo, SystemdUnitStatus,
};
pub use error::{DecodeError, EncodeError, HashError, ParseError};
pub use event::{extensions, Envelope, EventAction, EventType, SubResource};
pub use hash::{status_hash, ContentHash};
pub use lister::{ListOptions, Lister, StaticLister};
pub use resource::{Resource, ResourceAction, ResourceKind};
pub use types::{OrgId, ResourceId, ResourceVersion};
