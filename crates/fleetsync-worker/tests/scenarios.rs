//! End-to-end scenarios over the in-memory bus, store, and queue.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fleetsync_bus::{AgentClient, PublishOutcome, ResourceHandler};
use fleetsync_core::{
    Codec, DeviceKind, OrgId, ResourceAction, ResourceId, StaticLister, SubResource,
};
use fleetsync_core::{DeviceSpec, DeviceStatus};
use fleetsync_store::{DeviceRecord, MemoryStore, Result as StoreResult, StatusUpdate, Store};
use fleetsync_testkit::fixtures::{
    deterministic_options, epoch, recording_handler, spec, spec_device, status_device, TestFixture,
};
use fleetsync_worker::{MemoryQueueProvider, Task, WorkerConfig, WorkerError, WorkerServer};

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), WorkerError>>,
}

impl Running {
    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("worker did not stop")
            .expect("worker task panicked")
            .expect("worker returned an error");
    }
}

/// Delegates to a memory store, delaying every read.
struct SlowReads {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

#[async_trait]
impl Store for SlowReads {
    async fn update_status(&self, org: &OrgId, name: &ResourceId, status: &DeviceStatus) -> StoreResult<StatusUpdate> {
        self.inner.update_status(org, name, status).await
    }

    async fn upsert_spec(&self, org: &OrgId, name: &ResourceId, spec: &DeviceSpec) -> StoreResult<DeviceRecord> {
        self.inner.upsert_spec(org, name, spec).await
    }

    async fn mark_deleted(&self, org: &OrgId, name: &ResourceId, at: DateTime<Utc>) -> StoreResult<DeviceRecord> {
        self.inner.mark_deleted(org, name, at).await
    }

    async fn get_device(&self, org: &OrgId, name: &ResourceId) -> StoreResult<Option<DeviceRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_device(org, name).await
    }

    async fn list_devices(&self, org: &OrgId) -> StoreResult<Vec<DeviceRecord>> {
        self.inner.list_devices(org).await
    }
}

fn server(fixture: &TestFixture) -> WorkerServer {
    let store: Arc<dyn Store> = fixture.store.clone();
    WorkerServer::new(
        WorkerConfig::default(),
        store,
        Arc::new(MemoryQueueProvider::new(64)),
        fixture.source(),
    )
    .unwrap()
}

/// Start the worker and wait until its status subscription is registered.
async fn start(server: WorkerServer, fixture: &TestFixture) -> Running {
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.run(cancel.clone()));

    // Statuses published before the subscription exists are lost, so keep
    // publishing fresh ones until one is recorded.
    let probe = fixture.agent("probe");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    for attempt in 0u32.. {
        probe
            .publish_status(&status_device("probe", &attempt.to_string()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        if stored_version(&fixture.store, "probe").await.is_some() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "worker did not subscribe in time");
    }

    Running { cancel, handle }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn stored_version(store: &MemoryStore, name: &str) -> Option<String> {
    store
        .get_device(&OrgId::NULL, &name.into())
        .await
        .unwrap()
        .and_then(|record| record.status)
        .and_then(|status| status.rendered_version().map(str::to_owned))
}

#[tokio::test]
async fn scenario_a_agent_receives_published_spec() {
    let fixture = TestFixture::new();
    let source = fixture.source();
    let agent = fixture.agent("dev-1");

    let (handler, mut recorded) = recording_handler();
    let cancel = CancellationToken::new();
    agent.subscribe_spec(cancel.clone(), vec![handler]).await.unwrap();

    let device = spec_device("dev-1", "3");
    source.publish_spec(&device).await.unwrap();

    let (action, received) = recorded.next().await.expect("spec not delivered");
    assert_eq!(action, ResourceAction::Update);
    assert_eq!(received.id.as_str(), "dev-1");
    assert_eq!(received.version.as_str(), "3");
    assert_eq!(received.spec, Some(spec("3")));
    assert!(received.status.is_none());
    cancel.cancel();
}

#[tokio::test]
async fn scenario_b_status_reaches_the_store() {
    let fixture = TestFixture::new();
    let running = start(server(&fixture), &fixture).await;

    let agent = fixture.agent("dev-1");
    let device = status_device("dev-1", "4");
    agent.publish_status(&device).await.unwrap();

    let store = fixture.store.clone();
    eventually(|| {
        let store = store.clone();
        async move { stored_version(&store, "dev-1").await.as_deref() == Some("4") }
    })
    .await;

    let record = fixture
        .store
        .get_device(&OrgId::NULL, &"dev-1".into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, device.status);
    assert!(record.deletion_timestamp.is_none());
    running.stop().await;
}

#[tokio::test]
async fn scenario_c_missing_cluster_name_is_dropped() {
    let fixture = TestFixture::new();
    let running = start(server(&fixture), &fixture).await;

    let codec = Codec::<DeviceKind>::system(SubResource::Status);
    let mut envelope = codec
        .encode("dev-9", &codec.event_type(), &status_device("dev-9", "1"))
        .unwrap();
    envelope.extensions.remove("clustername");
    assert!(codec.decode(&envelope).is_err());
    fixture.network.inject(envelope).await;

    // A later valid event is handled, so the bad one was already passed over.
    fixture
        .agent("dev-1")
        .publish_status(&status_device("dev-1", "1"))
        .await
        .unwrap();
    let store = fixture.store.clone();
    eventually(|| {
        let store = store.clone();
        async move { stored_version(&store, "dev-1").await.is_some() }
    })
    .await;

    assert!(stored_version(&fixture.store, "dev-9").await.is_none());
    running.stop().await;
}

#[tokio::test]
async fn scenario_d_identical_status_is_published_once() {
    let fixture = TestFixture::new();
    let agent = fixture.agent("dev-1");
    let device = status_device("dev-1", "2");

    assert_eq!(agent.publish_status(&device).await.unwrap(), PublishOutcome::Published);
    assert_eq!(agent.publish_status(&device).await.unwrap(), PublishOutcome::Suppressed);
    assert_eq!(fixture.network.publish_count(), 1);
}

#[tokio::test]
async fn lagging_device_gets_its_spec_republished() {
    let fixture = TestFixture::new();
    let name: ResourceId = "dev-1".into();
    fixture.store.upsert_spec(&fixture.org, &name, &spec("a")).await.unwrap();
    fixture.store.upsert_spec(&fixture.org, &name, &spec("b")).await.unwrap();

    let running = start(server(&fixture), &fixture).await;

    let agent = fixture.agent("dev-1");
    let (handler, mut recorded) = recording_handler();
    let cancel = CancellationToken::new();
    agent.subscribe_spec(cancel.clone(), vec![handler]).await.unwrap();

    // The device still runs version 1; the record is at version 2.
    agent.publish_status(&status_device("dev-1", "1")).await.unwrap();

    let (action, received) = recorded.next().await.expect("spec not re-published");
    assert_eq!(action, ResourceAction::Update);
    assert_eq!(received.version.as_str(), "2");
    assert_eq!(received.spec, Some(spec("b")));

    cancel.cancel();
    running.stop().await;
}

#[tokio::test]
async fn deleted_device_spec_arrives_as_delete() {
    let fixture = TestFixture::new();
    let name: ResourceId = "dev-1".into();
    fixture.store.upsert_spec(&fixture.org, &name, &spec("a")).await.unwrap();
    fixture.store.mark_deleted(&fixture.org, &name, epoch()).await.unwrap();

    let server = server(&fixture);
    let callbacks = server.callbacks().clone();
    let running = start(server, &fixture).await;

    let agent = fixture.agent("dev-1");
    let (handler, mut recorded) = recording_handler();
    let cancel = CancellationToken::new();
    agent.subscribe_spec(cancel.clone(), vec![handler]).await.unwrap();

    callbacks.device_spec_updated(fixture.org, name).await.unwrap();

    let (action, received) = recorded.next().await.expect("spec not published");
    assert_eq!(action, ResourceAction::Delete);
    assert_eq!(received.deletion_timestamp, Some(epoch()));
    assert_eq!(received.version.as_str(), "2");

    cancel.cancel();
    running.stop().await;
}

#[tokio::test]
async fn shutdown_drains_enqueued_tasks() {
    let fixture = TestFixture::new();
    let server = server(&fixture);

    let completed = Arc::new(AtomicUsize::new(0));
    let counter = completed.clone();
    server.callbacks().on_complete(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    for i in 0..5 {
        server
            .callbacks()
            .enqueue(Task::PublishDeviceSpec {
                org: OrgId::NULL,
                name: format!("dev-{}", i).into(),
            })
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), server.run(cancel))
        .await
        .expect("worker did not stop")
        .unwrap();

    assert_eq!(completed.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn agent_reconnect_resyncs_its_status() {
    let fixture = TestFixture::new();
    let running = start(server(&fixture), &fixture).await;

    let lister = StaticLister::new(vec![status_device("dev-1", "7")]);
    let agent: AgentClient = AgentClient::with_bus(
        "dev-1",
        Arc::new(fixture.network.connect("dev-1")),
        deterministic_options("dev-1").with_lister(Arc::new(lister)),
    );
    let handlers: Vec<Arc<dyn ResourceHandler<DeviceKind>>> = Vec::new();
    let cancel = CancellationToken::new();
    agent.subscribe_spec(cancel.clone(), handlers).await.unwrap();

    fixture.network.simulate_reconnect().await;

    let store = fixture.store.clone();
    eventually(|| {
        let store = store.clone();
        async move { stored_version(&store, "dev-1").await.as_deref() == Some("7") }
    })
    .await;

    cancel.cancel();
    running.stop().await;
}

#[tokio::test]
async fn lagging_fleet_behind_a_small_queue_keeps_ingesting() {
    let fixture = TestFixture::new();
    let agents = fixture.agents(50);
    for agent in &agents {
        let name: ResourceId = agent.device_name().into();
        fixture.store.upsert_spec(&fixture.org, &name, &spec("a")).await.unwrap();
        fixture.store.upsert_spec(&fixture.org, &name, &spec("b")).await.unwrap();
    }

    let store: Arc<dyn Store> = Arc::new(SlowReads {
        inner: fixture.store.clone(),
        delay: Duration::from_millis(20),
    });
    let server = WorkerServer::new(
        WorkerConfig::default(),
        store,
        Arc::new(MemoryQueueProvider::new(4)),
        fixture.source(),
    )
    .unwrap();
    let running = start(server, &fixture).await;

    // Every device reports version 1 while its record is at version 2.
    for agent in &agents {
        agent
            .publish_status(&status_device(agent.device_name(), "1"))
            .await
            .unwrap();
    }

    let store = fixture.store.clone();
    eventually(|| {
        let store = store.clone();
        async move {
            let mut stored = 0;
            for i in 0..50 {
                if stored_version(&store, &format!("dev-{}", i)).await.as_deref() == Some("1") {
                    stored += 1;
                }
            }
            stored == 50
        }
    })
    .await;

    let network = fixture.network.clone();
    eventually(|| {
        let network = network.clone();
        async move { network.published().iter().any(|p| p.from == fleetsync_bus::SOURCE_ID) }
    })
    .await;

    running.stop().await;
}
