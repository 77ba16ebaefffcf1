//! Resource: the unit of synchronization.
//!
//! A resource pairs an identity and version with two payloads that travel
//! in opposite directions: `spec` (desired state, authored by the source)
//! and `status` (observed state, authored by the agent). Any single event
//! carries exactly one of the two.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use crate::event::SubResource;
use crate::types::{ResourceId, ResourceVersion};

/// A kind of synchronizable resource.
///
/// Implementors are zero-sized markers naming the event data type and the
/// payload types carried in each direction.
pub trait ResourceKind: Debug + Clone + PartialEq + Send + Sync + 'static {
    /// Kind segment of the event type string, e.g. `io.fleetsync.devices.v1alpha1`.
    const DATA_TYPE: &'static str;

    /// Desired-state payload.
    type Spec: Serialize + DeserializeOwned + Debug + Clone + PartialEq + Send + Sync + 'static;

    /// Observed-state payload.
    type Status: Serialize + DeserializeOwned + Debug + Clone + PartialEq + Send + Sync + 'static;
}

/// A synchronizable entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource<K: ResourceKind> {
    /// Stable identity; primary key for routing and store lookups.
    pub id: ResourceId,
    /// Version supplied by the producing side.
    pub version: ResourceVersion,
    /// Set when the resource is being torn down.
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Desired state.
    pub spec: Option<K::Spec>,
    /// Observed state.
    pub status: Option<K::Status>,
}

impl<K: ResourceKind> Resource<K> {
    /// A resource carrying only a spec.
    pub fn with_spec(
        id: impl Into<ResourceId>,
        version: impl Into<ResourceVersion>,
        spec: K::Spec,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            deletion_timestamp: None,
            spec: Some(spec),
            status: None,
        }
    }

    /// A resource carrying only a status.
    pub fn with_status(
        id: impl Into<ResourceId>,
        version: impl Into<ResourceVersion>,
        status: K::Status,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            deletion_timestamp: None,
            spec: None,
            status: Some(status),
        }
    }

    /// Mark the resource as being deleted at `at`.
    pub fn deleted_at(mut self, at: DateTime<Utc>) -> Self {
        self.deletion_timestamp = Some(at);
        self
    }

    /// Whether a deletion marker is present.
    pub fn is_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Whether the field for `field` is populated.
    pub fn has(&self, field: SubResource) -> bool {
        match field {
            SubResource::Spec => self.spec.is_some(),
            SubResource::Status => self.status.is_some(),
        }
    }

    /// A copy restricted to the field for `field`, the other one cleared.
    pub fn view(&self, field: SubResource) -> Self {
        let mut view = self.clone();
        match field {
            SubResource::Spec => view.status = None,
            SubResource::Status => view.spec = None,
        }
        view
    }
}

/// Classification handed to subscribers alongside each decoded resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAction {
    /// The resource was created or changed.
    Update,
    /// The resource carries a deletion marker.
    Delete,
}

impl ResourceAction {
    /// Classify a decoded resource.
    pub fn classify<K: ResourceKind>(resource: &Resource<K>) -> Self {
        if resource.is_deleted() {
            Self::Delete
        } else {
            Self::Update
        }
    }
}
