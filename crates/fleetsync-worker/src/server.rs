//! The worker server: wires the status subscription to the task pipeline
//! and runs until cancelled.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fleetsync_bus::{ResourceHandler, SourceClient};
use fleetsync_core::DeviceKind;
use fleetsync_store::{MemoryStore, SqliteStore, Store, StoreError};

use crate::config::{StoreConfig, WorkerConfig, MEMORY_STORE};
use crate::error::Result;
use crate::ingest::StatusIngest;
use crate::queues::{QueueProvider, TASK_QUEUE};
use crate::tasks::{launch_consumers, CallbackManager, DeviceSyncConsumer};

/// Open the store named by `config`.
pub fn open_store(config: &StoreConfig) -> std::result::Result<Arc<dyn Store>, StoreError> {
    if config.path == MEMORY_STORE {
        info!("using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    info!(path = %config.path, "opening SQLite store");
    Ok(Arc::new(SqliteStore::open(&config.path)?))
}

/// Runs the synchronization driver.
pub struct WorkerServer {
    config: WorkerConfig,
    store: Arc<dyn Store>,
    provider: Arc<dyn QueueProvider>,
    source: SourceClient,
    callbacks: Arc<CallbackManager>,
}

impl WorkerServer {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn Store>,
        provider: Arc<dyn QueueProvider>,
        source: SourceClient,
    ) -> Result<Self> {
        let publisher = provider.publisher(TASK_QUEUE)?;
        Ok(Self {
            config,
            store,
            provider,
            source,
            callbacks: Arc::new(CallbackManager::new(publisher)),
        })
    }

    /// Enqueue tasks and observe their outcomes.
    pub fn callbacks(&self) -> &Arc<CallbackManager> {
        &self.callbacks
    }

    /// Launch consumers, subscribe to device statuses, and block until
    /// `cancel` fires.
    ///
    /// On cancellation the queue provider stops taking new work, the
    /// subscription ends, and this returns once queued tasks have drained.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!("initializing async jobs");
        let consumer = Arc::new(DeviceSyncConsumer::new(
            Arc::clone(&self.store),
            self.source.clone(),
            Arc::clone(&self.callbacks),
        ));
        launch_consumers(self.provider.as_ref(), consumer, self.config.queue.consumers)?;

        let ingest: Arc<dyn ResourceHandler<DeviceKind>> = Arc::new(StatusIngest::new(
            Arc::clone(&self.store),
            self.config.service.org_id,
            Arc::clone(&self.callbacks),
            self.config.ingest.clone(),
        ));
        let subscription = CancellationToken::new();
        let subscriber = match self.source.subscribe_status(subscription.clone(), vec![ingest]).await {
            Ok(handle) => handle,
            Err(e) => {
                self.provider.stop();
                self.provider.wait().await;
                return Err(e.into());
            }
        };
        info!(org_id = %self.config.service.org_id, "worker running");

        cancel.cancelled().await;
        info!("shutdown requested");

        self.provider.stop();
        subscription.cancel();
        self.provider.wait().await;
        if let Err(e) = subscriber.await {
            warn!(error = %e, "status subscription task failed");
        }

        info!("worker stopped");
        Ok(())
    }
}
