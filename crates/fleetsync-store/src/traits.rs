//! Store trait: the abstract interface for device record persistence.
//!
//! Implementations serialize access internally, so callers may write
//! concurrently without holding any lock of their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use fleetsync_core::{
    ContentHash, Device, DeviceSpec, DeviceStatus, OrgId, Resource, ResourceId, ResourceVersion,
};

use crate::error::Result;

/// Authoritative record for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub org_id: OrgId,
    pub name: ResourceId,
    /// Bumped on every spec change or deletion; stamped on published specs.
    pub resource_version: u64,
    pub spec: Option<DeviceSpec>,
    pub status: Option<DeviceStatus>,
    /// Content hash of `status`, used for receive-side dedup.
    pub status_hash: Option<ContentHash>,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// An empty record with version zero.
    pub fn new(org_id: OrgId, name: ResourceId, now: DateTime<Utc>) -> Self {
        Self {
            org_id,
            name,
            resource_version: 0,
            spec: None,
            status: None,
            status_hash: None,
            deletion_timestamp: None,
            updated_at: now,
        }
    }

    /// The spec-direction view of this record, ready to publish.
    ///
    /// Returns `None` when no spec has been stored yet.
    pub fn spec_resource(&self) -> Option<Device> {
        let spec = self.spec.clone()?;
        Some(Resource {
            id: self.name.clone(),
            version: ResourceVersion::from(self.resource_version),
            deletion_timestamp: self.deletion_timestamp,
            spec: Some(spec),
            status: None,
        })
    }

    /// Apply a status whose hash is `hash`, returning what changed.
    pub fn apply_status(&mut self, status: &DeviceStatus, hash: ContentHash, now: DateTime<Utc>) -> StatusUpdate {
        if self.status_hash == Some(hash) {
            return StatusUpdate::Unchanged;
        }
        let outcome = if self.status.is_none() {
            StatusUpdate::Created
        } else {
            StatusUpdate::Updated
        };
        self.status = Some(status.clone());
        self.status_hash = Some(hash);
        self.updated_at = now;
        outcome
    }

    /// Apply a spec, bumping the version if it differs. Returns whether the
    /// record changed.
    pub fn apply_spec(&mut self, spec: &DeviceSpec, now: DateTime<Utc>) -> bool {
        if self.spec.as_ref() == Some(spec) && self.deletion_timestamp.is_none() {
            return false;
        }
        self.spec = Some(spec.clone());
        self.deletion_timestamp = None;
        self.resource_version += 1;
        self.updated_at = now;
        true
    }

    /// Set the deletion marker and bump the version.
    pub fn apply_deletion(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) {
        if self.deletion_timestamp.is_some() {
            return;
        }
        self.deletion_timestamp = Some(at);
        self.resource_version += 1;
        self.updated_at = now;
    }
}

/// Result of writing an inbound status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    /// First status recorded for this device.
    Created,
    /// Status changed.
    Updated,
    /// Same content hash as the stored status; nothing written.
    Unchanged,
}

impl StatusUpdate {
    /// Whether the write changed stored state.
    pub fn changed(&self) -> bool {
        !matches!(self, StatusUpdate::Unchanged)
    }
}

/// The Store trait: async interface for device persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Status (written by the sync driver)
    // ─────────────────────────────────────────────────────────────────────────

    /// Record an inbound status for `name`, creating the record if needed.
    ///
    /// Returns `Unchanged` without writing when the status hashes the same
    /// as the stored one.
    async fn update_status(
        &self,
        org: &OrgId,
        name: &ResourceId,
        status: &DeviceStatus,
    ) -> Result<StatusUpdate>;

    // ─────────────────────────────────────────────────────────────────────────
    // Spec and lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a desired spec, bumping `resource_version` when it changes.
    async fn upsert_spec(
        &self,
        org: &OrgId,
        name: &ResourceId,
        spec: &DeviceSpec,
    ) -> Result<DeviceRecord>;

    /// Mark a device as being deleted.
    ///
    /// Fails with `NotFound` if there is no such record.
    async fn mark_deleted(
        &self,
        org: &OrgId,
        name: &ResourceId,
        at: DateTime<Utc>,
    ) -> Result<DeviceRecord>;

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_device(&self, org: &OrgId, name: &ResourceId) -> Result<Option<DeviceRecord>>;

    /// All devices of an organization, ordered by name.
    async fn list_devices(&self, org: &OrgId) -> Result<Vec<DeviceRecord>>;
}
