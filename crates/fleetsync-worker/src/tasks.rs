//! Asynchronous device tasks.
//!
//! Status ingestion does no network work itself. It offers a
//! [`Task::ReconcileDeviceStatus`] to the queue without waiting, and the
//! consumer decides whether the device needs its spec re-published.
//!
//! ```text
//! status event ──► StatusIngest ──► store.update_status
//!                                        │ Created / Updated
//!                                        ▼
//!                           ReconcileDeviceStatus ──► rendered != version?
//!                                                          │ yes
//!                                                          ▼
//!                                                   source.publish_spec
//! ```
//!
//! A consumer never enqueues into the queue it drains: with every consumer
//! blocked on a full queue nothing would ever empty it.

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fleetsync_bus::SourceClient;
use fleetsync_core::{OrgId, ResourceId};
use fleetsync_store::{DeviceRecord, Store};

use crate::error::QueueError;
use crate::queues::{Publisher, QueueHandler, QueueProvider, TASK_QUEUE};

/// Work items carried on [`TASK_QUEUE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Publish the stored spec of a device.
    PublishDeviceSpec { org: OrgId, name: ResourceId },
    /// Compare a device's reported rendered version with its record.
    ReconcileDeviceStatus { org: OrgId, name: ResourceId },
}

impl Task {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Task::PublishDeviceSpec { .. } => "publish_device_spec",
            Task::ReconcileDeviceStatus { .. } => "reconcile_device_status",
        }
    }

    /// The device this task is about.
    pub fn device(&self) -> (&OrgId, &ResourceId) {
        match self {
            Task::PublishDeviceSpec { org, name } | Task::ReconcileDeviceStatus { org, name } => {
                (org, name)
            }
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (org, name) = self.device();
        write!(f, "{}({}/{})", self.kind(), org, name)
    }
}

/// What a task run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task: Task,
    /// Error message when the run failed.
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

type Callback = Box<dyn Fn(&TaskOutcome) + Send + Sync>;

/// Enqueues tasks and notifies listeners when they complete.
pub struct CallbackManager {
    publisher: Arc<dyn Publisher>,
    callbacks: RwLock<Vec<Callback>>,
}

impl CallbackManager {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Serialize `task` onto the task queue.
    pub async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&task)?;
        self.publisher.publish(payload).await?;
        debug!(task = %task, "task enqueued");
        Ok(())
    }

    /// Register a listener called after every task run.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: Fn(&TaskOutcome) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Box::new(callback));
    }

    /// A device's spec changed and should be pushed to it.
    pub async fn device_spec_updated(&self, org: OrgId, name: ResourceId) -> Result<(), QueueError> {
        self.enqueue(Task::PublishDeviceSpec { org, name }).await
    }

    /// Serialize `task` onto the task queue if there is room right now.
    pub fn try_enqueue(&self, task: Task) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&task)?;
        self.publisher.try_publish(payload)?;
        debug!(task = %task, "task enqueued");
        Ok(())
    }

    /// A device reported a new status.
    ///
    /// Does not wait for queue space, so it is safe to call from an event
    /// subscription; a full queue yields [`QueueError::Full`].
    pub fn device_status_updated(&self, org: OrgId, name: ResourceId) -> Result<(), QueueError> {
        self.try_enqueue(Task::ReconcileDeviceStatus { org, name })
    }

    fn complete(&self, outcome: &TaskOutcome) {
        for callback in self.callbacks.read().iter() {
            callback(outcome);
        }
    }
}

/// Runs device tasks taken from the task queue.
pub struct DeviceSyncConsumer {
    store: Arc<dyn Store>,
    source: SourceClient,
    callbacks: Arc<CallbackManager>,
}

impl DeviceSyncConsumer {
    pub fn new(store: Arc<dyn Store>, source: SourceClient, callbacks: Arc<CallbackManager>) -> Self {
        Self {
            store,
            source,
            callbacks,
        }
    }

    /// Execute one task.
    pub async fn run(&self, task: &Task) -> anyhow::Result<()> {
        match task {
            Task::PublishDeviceSpec { org, name } => self.publish_spec(org, name).await,
            Task::ReconcileDeviceStatus { org, name } => self.reconcile_status(org, name).await,
        }
    }

    async fn publish_spec(&self, org: &OrgId, name: &ResourceId) -> anyhow::Result<()> {
        match self.store.get_device(org, name).await? {
            Some(record) => self.publish_record(&record).await,
            None => {
                warn!(org_id = %org, resource_id = %name, "device not found, spec not published");
                Ok(())
            }
        }
    }

    async fn publish_record(&self, record: &DeviceRecord) -> anyhow::Result<()> {
        let (org, name) = (&record.org_id, &record.name);
        let Some(device) = record.spec_resource() else {
            debug!(org_id = %org, resource_id = %name, "device has no spec yet");
            return Ok(());
        };

        let outcome = self
            .source
            .publish_spec(&device)
            .await
            .with_context(|| format!("publishing spec of device {}", name))?;
        info!(
            org_id = %org,
            resource_id = %name,
            resource_version = %device.version,
            deleted = device.is_deleted(),
            ?outcome,
            "published device spec"
        );
        Ok(())
    }

    async fn reconcile_status(&self, org: &OrgId, name: &ResourceId) -> anyhow::Result<()> {
        let Some(record) = self.store.get_device(org, name).await? else {
            warn!(org_id = %org, resource_id = %name, "device not found, nothing to reconcile");
            return Ok(());
        };
        if record.spec.is_none() {
            debug!(org_id = %org, resource_id = %name, "device has no spec, nothing to reconcile");
            return Ok(());
        }

        let expected = record.resource_version.to_string();
        let reported = record.status.as_ref().and_then(|s| s.rendered_version());
        if reported == Some(expected.as_str()) {
            debug!(org_id = %org, resource_id = %name, version = %expected, "device is up to date");
            return Ok(());
        }

        info!(
            org_id = %org,
            resource_id = %name,
            expected = %expected,
            reported = reported.unwrap_or("<none>"),
            "device is behind its spec, re-publishing"
        );
        self.publish_record(&record).await
    }
}

#[async_trait]
impl QueueHandler for DeviceSyncConsumer {
    async fn handle(&self, payload: Vec<u8>) -> anyhow::Result<()> {
        let task: Task = serde_json::from_slice(&payload).context("decoding task")?;
        debug!(task = %task, "running task");

        let result = self.run(&task).await;
        self.callbacks.complete(&TaskOutcome {
            task: task.clone(),
            error: result.as_ref().err().map(|e| format!("{:#}", e)),
        });
        result.with_context(|| format!("task {}", task))
    }
}

/// Start `count` consumers of the task queue.
pub fn launch_consumers(
    provider: &dyn QueueProvider,
    consumer: Arc<DeviceSyncConsumer>,
    count: usize,
) -> Result<(), QueueError> {
    for _ in 0..count {
        provider.consume(TASK_QUEUE, consumer.clone())?;
    }
    info!(count, queue = TASK_QUEUE, "launched task consumers");
    Ok(())
}
