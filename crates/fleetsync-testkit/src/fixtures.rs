//! Test fixtures and helpers.
//!
//! Common setup code for client and driver tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use fleetsync_bus::{AgentClient, ClientOptions, MemoryNetwork, ResourceHandler, SourceClient};
use fleetsync_core::{
    Clock, Condition, ConditionStatus, ConfigStatus, Device, DeviceKind, DeviceOsSpec, DeviceSpec,
    DeviceStatus, IdGenerator, OrgId, ResourceAction, SystemInfo,
};
use fleetsync_store::MemoryStore;

/// 2026-01-01T00:00:00Z, the instant every fixture clock starts at.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A clock that always reads the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Default for FixedClock {
    fn default() -> Self {
        Self(epoch())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Event ids `<prefix>-0`, `<prefix>-1`, ...
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new("evt")
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        format!("{}-{}", self.prefix, self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Client options with a fixed clock and sequential ids under `prefix`.
pub fn deterministic_options(prefix: &str) -> ClientOptions<DeviceKind> {
    ClientOptions::default()
        .with_clock(Arc::new(FixedClock::default()))
        .with_ids(Arc::new(SequentialIds::new(prefix)))
}

/// A spec rendered at `version` with an OS image pinned.
pub fn spec(version: &str) -> DeviceSpec {
    DeviceSpec {
        os: Some(DeviceOsSpec {
            image: format!("quay.io/fleetsync/os:{}", version),
        }),
        ..DeviceSpec::new(version)
    }
}

/// A healthy status reporting `rendered_version`.
pub fn status(rendered_version: &str) -> DeviceStatus {
    DeviceStatus {
        conditions: vec![Condition {
            condition_type: "Updating".into(),
            status: ConditionStatus::False,
            reason: Some("Updated".into()),
            message: None,
            last_transition_time: Some(epoch()),
        }],
        system_info: Some(SystemInfo {
            architecture: "arm64".into(),
            boot_id: "b0e7c2d4".into(),
            operating_system: "linux".into(),
        }),
        config: ConfigStatus {
            rendered_version: rendered_version.into(),
        },
        ..DeviceStatus::default()
    }
}

/// A spec-direction device.
pub fn spec_device(name: &str, version: &str) -> Device {
    Device::with_spec(name, version, spec(version))
}

/// A status-direction device reporting `rendered_version`.
pub fn status_device(name: &str, rendered_version: &str) -> Device {
    Device::with_status(name, rendered_version, status(rendered_version))
}

/// Handler that forwards every call to a channel.
pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<(ResourceAction, Device)>,
}

/// Receiving side of a [`RecordingHandler`].
pub struct Recorded {
    rx: mpsc::UnboundedReceiver<(ResourceAction, Device)>,
}

/// A handler paired with the receiver of what it sees.
pub fn recording_handler() -> (Arc<RecordingHandler>, Recorded) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingHandler { tx }), Recorded { rx })
}

#[async_trait]
impl ResourceHandler<DeviceKind> for RecordingHandler {
    async fn handle(&self, action: ResourceAction, resource: Device) -> anyhow::Result<()> {
        self.tx
            .send((action, resource))
            .map_err(|_| anyhow::anyhow!("recorder dropped"))
    }
}

impl Recorded {
    /// Wait up to `timeout` for the next call.
    pub async fn next_within(&mut self, timeout: Duration) -> Option<(ResourceAction, Device)> {
        tokio::time::timeout(timeout, self.rx.recv()).await.ok().flatten()
    }

    /// Wait up to five seconds for the next call.
    pub async fn next(&mut self) -> Option<(ResourceAction, Device)> {
        self.next_within(Duration::from_secs(5)).await
    }

    /// A call already delivered, without waiting.
    pub fn try_next(&mut self) -> Option<(ResourceAction, Device)> {
        self.rx.try_recv().ok()
    }
}

/// An in-memory fleet: one network, one store, deterministic clients.
pub struct TestFixture {
    pub network: Arc<MemoryNetwork>,
    pub store: Arc<MemoryStore>,
    pub org: OrgId,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            network: MemoryNetwork::new(),
            store: Arc::new(MemoryStore::new()),
            org: OrgId::NULL,
        }
    }

    /// A source client on this fixture's network.
    pub fn source(&self) -> SourceClient {
        SourceClient::with_bus(
            Arc::new(self.network.connect(fleetsync_bus::SOURCE_ID)),
            deterministic_options("src"),
        )
    }

    /// An agent client for `device_name` on this fixture's network.
    pub fn agent(&self, device_name: &str) -> AgentClient {
        AgentClient::with_bus(
            device_name,
            Arc::new(self.network.connect(device_name)),
            deterministic_options(device_name),
        )
    }

    /// Agents named `dev-0` .. `dev-{count-1}`.
    pub fn agents(&self, count: usize) -> Vec<AgentClient> {
        (0..count).map(|i| self.agent(&format!("dev-{}", i))).collect()
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
