//! Status ingestion: the handler registered on the source's status
//! subscription.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use fleetsync_bus::ResourceHandler;
use fleetsync_core::{Device, DeviceKind, DeviceStatus, OrgId, ResourceAction, ResourceId};
use fleetsync_store::{Store, StoreError, StatusUpdate};

use crate::config::IngestConfig;
use crate::error::QueueError;
use crate::tasks::CallbackManager;

/// Writes every delivered status to the store, then schedules a reconcile
/// when the stored status changed.
pub struct StatusIngest {
    store: Arc<dyn Store>,
    org: OrgId,
    callbacks: Arc<CallbackManager>,
    config: IngestConfig,
}

impl StatusIngest {
    pub fn new(
        store: Arc<dyn Store>,
        org: OrgId,
        callbacks: Arc<CallbackManager>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            org,
            callbacks,
            config,
        }
    }

    /// `update_status` with bounded retries. The last error is returned when
    /// every attempt fails.
    async fn write_status(&self, name: &ResourceId, status: &DeviceStatus) -> Result<StatusUpdate, StoreError> {
        let mut retry = 0;
        loop {
            match self.store.update_status(&self.org, name, status).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if retry < self.config.write_retries => {
                    retry += 1;
                    let delay = self.config.backoff(retry);
                    warn!(
                        resource_id = %name,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "status write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ResourceHandler<DeviceKind> for StatusIngest {
    async fn handle(&self, action: ResourceAction, device: Device) -> anyhow::Result<()> {
        if action == ResourceAction::Delete {
            info!(resource_id = %device.id, "device status carries a deletion marker, not recorded");
            return Ok(());
        }
        let Some(status) = device.status.as_ref() else {
            warn!(resource_id = %device.id, "status event without a status, not recorded");
            return Ok(());
        };

        info!(resource_id = %device.id, version = %device.version, "received device status");
        let outcome = self
            .write_status(&device.id, status)
            .await
            .with_context(|| format!("recording status of device {}", device.id))?;

        match outcome {
            StatusUpdate::Unchanged => {
                debug!(resource_id = %device.id, "status unchanged");
            }
            StatusUpdate::Created | StatusUpdate::Updated => {
                debug!(resource_id = %device.id, ?outcome, "status stored");
                // Reconcile is idempotent and the device's next status
                // schedules it again, so a full queue only costs a delay.
                match self.callbacks.device_status_updated(self.org, device.id.clone()) {
                    Ok(()) => {}
                    Err(QueueError::Full(queue)) => {
                        warn!(resource_id = %device.id, queue = %queue, "task queue full, reconcile skipped");
                    }
                    Err(e) => {
                        return Err(e).with_context(|| format!("scheduling reconcile of device {}", device.id));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use fleetsync_core::DeviceSpec;
    use fleetsync_store::{DeviceRecord, MemoryStore, Result as StoreResult};
    use fleetsync_testkit::fixtures::{epoch, status_device};

    use crate::queues::{MemoryQueueProvider, QueueProvider, TASK_QUEUE};

    /// Fails the first `failures` status writes, then delegates.
    struct Flaky {
        inner: MemoryStore,
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Store for Flaky {
        async fn update_status(&self, org: &OrgId, name: &ResourceId, status: &DeviceStatus) -> StoreResult<StatusUpdate> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(StoreError::Task("database is locked".into()));
            }
            self.inner.update_status(org, name, status).await
        }

        async fn upsert_spec(&self, org: &OrgId, name: &ResourceId, spec: &DeviceSpec) -> StoreResult<DeviceRecord> {
            self.inner.upsert_spec(org, name, spec).await
        }

        async fn mark_deleted(&self, org: &OrgId, name: &ResourceId, at: DateTime<Utc>) -> StoreResult<DeviceRecord> {
            self.inner.mark_deleted(org, name, at).await
        }

        async fn get_device(&self, org: &OrgId, name: &ResourceId) -> StoreResult<Option<DeviceRecord>> {
            self.inner.get_device(org, name).await
        }

        async fn list_devices(&self, org: &OrgId) -> StoreResult<Vec<DeviceRecord>> {
            self.inner.list_devices(org).await
        }
    }

    fn ingest(store: Arc<dyn Store>, provider: &MemoryQueueProvider, retries: u32) -> StatusIngest {
        let callbacks = Arc::new(CallbackManager::new(provider.publisher(TASK_QUEUE).unwrap()));
        let config = IngestConfig::default()
            .with_write_retries(retries)
            .with_retry_backoff(Duration::from_millis(1));
        StatusIngest::new(store, OrgId::NULL, callbacks, config)
    }

    #[tokio::test]
    async fn test_new_status_is_stored_and_reconciled() {
        let store = Arc::new(MemoryStore::new());
        let provider = MemoryQueueProvider::new(8);
        let handler = ingest(store.clone(), &provider, 0);

        handler
            .handle(ResourceAction::Update, status_device("dev-1", "1"))
            .await
            .unwrap();

        let record = store.get_device(&OrgId::NULL, &"dev-1".into()).await.unwrap().unwrap();
        assert_eq!(record.status.unwrap().rendered_version(), Some("1"));
        assert_eq!(provider.pending(TASK_QUEUE), 1);
    }

    #[tokio::test]
    async fn test_duplicate_status_is_not_reconciled_again() {
        let store = Arc::new(MemoryStore::new());
        let provider = MemoryQueueProvider::new(8);
        let handler = ingest(store.clone(), &provider, 0);

        for _ in 0..3 {
            handler
                .handle(ResourceAction::Update, status_device("dev-1", "1"))
                .await
                .unwrap();
        }

        assert_eq!(store.status_writes(), 1);
        assert_eq!(provider.pending(TASK_QUEUE), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = Arc::new(Flaky::new(2));
        let provider = MemoryQueueProvider::new(8);
        let handler = ingest(store.clone(), &provider, 3);

        handler
            .handle(ResourceAction::Update, status_device("dev-1", "1"))
            .await
            .unwrap();

        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert!(store.get_device(&OrgId::NULL, &"dev-1".into()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_the_error() {
        let store = Arc::new(Flaky::new(10));
        let provider = MemoryQueueProvider::new(8);
        let handler = ingest(store.clone(), &provider, 2);

        let err = handler
            .handle(ResourceAction::Update, status_device("dev-1", "1"))
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("database is locked"));
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(provider.pending(TASK_QUEUE), 0);
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_ingest() {
        let store = Arc::new(MemoryStore::new());
        let provider = MemoryQueueProvider::new(2);
        let handler = ingest(store.clone(), &provider, 0);

        let writes = async {
            for i in 0..5 {
                handler
                    .handle(ResourceAction::Update, status_device(&format!("dev-{}", i), "1"))
                    .await
                    .unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(1), writes)
            .await
            .expect("ingest waited on the task queue");

        assert_eq!(store.list_devices(&OrgId::NULL).await.unwrap().len(), 5);
        assert_eq!(provider.pending(TASK_QUEUE), 2);
    }

    #[tokio::test]
    async fn test_deletion_and_empty_events_are_not_written() {
        let store = Arc::new(MemoryStore::new());
        let provider = MemoryQueueProvider::new(8);
        let handler = ingest(store.clone(), &provider, 0);

        let deleted = status_device("dev-1", "1").deleted_at(epoch());
        handler
            .handle(ResourceAction::classify(&deleted), deleted)
            .await
            .unwrap();

        let mut empty = status_device("dev-2", "1");
        empty.status = None;
        handler.handle(ResourceAction::Update, empty).await.unwrap();

        assert!(store.list_devices(&OrgId::NULL).await.unwrap().is_empty());
        assert_eq!(provider.pending(TASK_QUEUE), 0);
    }
}
