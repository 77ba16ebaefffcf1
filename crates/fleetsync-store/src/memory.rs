//! In-memory implementation of the Store trait.
//!
//! Same semantics as SQLite but nothing is persisted. Used by tests and by
//! the worker when configured with `:memory:`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use fleetsync_core::{ContentHash, DeviceSpec, DeviceStatus, OrgId, ResourceId};

use crate::error::{Result, StoreError};
use crate::traits::{DeviceRecord, StatusUpdate, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

struct MemoryStoreInner {
    /// Records keyed by (org, name); BTreeMap keeps listings name-ordered.
    devices: BTreeMap<(OrgId, ResourceId), DeviceRecord>,

    /// Number of status writes that changed stored state.
    status_writes: u64,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                devices: BTreeMap::new(),
                status_writes: 0,
            }),
        }
    }

    /// How many `update_status` calls changed stored state.
    pub fn status_writes(&self) -> u64 {
        self.inner.read().status_writes
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn update_status(
        &self,
        org: &OrgId,
        name: &ResourceId,
        status: &DeviceStatus,
    ) -> Result<StatusUpdate> {
        let hash = ContentHash::of(status)?;
        let now = Utc::now();
        let mut inner = self.inner.write();

        let record = inner
            .devices
            .entry((*org, name.clone()))
            .or_insert_with(|| DeviceRecord::new(*org, name.clone(), now));
        let outcome = record.apply_status(status, hash, now);
        if outcome.changed() {
            inner.status_writes += 1;
        }
        Ok(outcome)
    }

    async fn upsert_spec(
        &self,
        org: &OrgId,
        name: &ResourceId,
        spec: &DeviceSpec,
    ) -> Result<DeviceRecord> {
        let now = Utc::now();
        let mut inner = self.inner.write();

        let record = inner
            .devices
            .entry((*org, name.clone()))
            .or_insert_with(|| DeviceRecord::new(*org, name.clone(), now));
        record.apply_spec(spec, now);
        Ok(record.clone())
    }

    async fn mark_deleted(
        &self,
        org: &OrgId,
        name: &ResourceId,
        at: DateTime<Utc>,
    ) -> Result<DeviceRecord> {
        let mut inner = self.inner.write();
        let record = inner
            .devices
            .get_mut(&(*org, name.clone()))
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        record.apply_deletion(at, Utc::now());
        Ok(record.clone())
    }

    async fn get_device(&self, org: &OrgId, name: &ResourceId) -> Result<Option<DeviceRecord>> {
        Ok(self.inner.read().devices.get(&(*org, name.clone())).cloned())
    }

    async fn list_devices(&self, org: &OrgId) -> Result<Vec<DeviceRecord>> {
        Ok(self
            .inner
            .read()
            .devices
            .iter()
            .filter(|((record_org, _), _)| record_org == org)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn other_org() -> OrgId {
        OrgId::parse("6f9619ff-8b86-d011-b42d-00cf4fc964ff").unwrap()
    }

    #[tokio::test]
    async fn test_update_status_creates_then_dedups() {
        let store = MemoryStore::new();
        let name = ResourceId::new("dev-1");
        let status = DeviceStatus::default();

        let first = store.update_status(&OrgId::NULL, &name, &status).await.unwrap();
        let second = store.update_status(&OrgId::NULL, &name, &status).await.unwrap();

        assert_eq!(first, StatusUpdate::Created);
        assert_eq!(second, StatusUpdate::Unchanged);
        assert_eq!(store.status_writes(), 1);

        let record = store.get_device(&OrgId::NULL, &name).await.unwrap().unwrap();
        assert_eq!(record.status, Some(status));
        assert!(record.status_hash.is_some());
    }

    #[tokio::test]
    async fn test_orgs_are_isolated() {
        let store = MemoryStore::new();
        let name = ResourceId::new("dev-1");
        store.upsert_spec(&OrgId::NULL, &name, &DeviceSpec::new("1")).await.unwrap();

        assert!(store.get_device(&other_org(), &name).await.unwrap().is_none());
        assert!(store.list_devices(&other_org()).await.unwrap().is_empty());
        assert_eq!(store.list_devices(&OrgId::NULL).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_name_ordered() {
        let store = MemoryStore::new();
        for name in ["dev-c", "dev-a", "dev-b"] {
            store
                .upsert_spec(&OrgId::NULL, &ResourceId::new(name), &DeviceSpec::new("1"))
                .await
                .unwrap();
        }
        let names: Vec<_> = store
            .list_devices(&OrgId::NULL)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name.into_string())
            .collect();
        assert_eq!(names, vec!["dev-a", "dev-b", "dev-c"]);
    }

    #[tokio::test]
    async fn test_mark_deleted_missing_device() {
        let store = MemoryStore::new();
        let err = store
            .mark_deleted(&OrgId::NULL, &ResourceId::new("ghost"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_upsert_spec_versions() {
        let store = MemoryStore::new();
        let name = ResourceId::new("dev-1");

        let v1 = store.upsert_spec(&OrgId::NULL, &name, &DeviceSpec::new("a")).await.unwrap();
        let same = store.upsert_spec(&OrgId::NULL, &name, &DeviceSpec::new("a")).await.unwrap();
        let v2 = store.upsert_spec(&OrgId::NULL, &name, &DeviceSpec::new("b")).await.unwrap();
        let deleted = store.mark_deleted(&OrgId::NULL, &name, Utc::now()).await.unwrap();

        assert_eq!(v1.resource_version, 1);
        assert_eq!(same.resource_version, 1);
        assert_eq!(v2.resource_version, 2);
        assert_eq!(deleted.resource_version, 3);
        assert!(deleted.deletion_timestamp.is_some());
    }
}
