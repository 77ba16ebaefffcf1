//! Generic pub/sub resource client.
//!
//! A [`ResourceClient`] publishes one direction of a resource kind and
//! subscribes to the other. The source and agent facades are thin wrappers
//! that fix the [`Role`] and identity.
//!
//! ## Publish
//!
//! ```text
//! resource ──► status hash (status direction only) ──► codec.encode ──► bus.publish
//!                   │
//!                   └─ equal to last successful publish? ──► Suppressed
//! ```
//!
//! ## Subscribe
//!
//! Each subscription runs on its own task and handles events strictly in
//! delivery order: decode, classify, then call every handler in turn.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fleetsync_core::{
    status_hash, Clock, Codec, ContentHash, Envelope, EventType, HashError, IdGenerator,
    ListOptions, Lister, Resource, ResourceAction, ResourceId, ResourceKind, StaticLister,
    SubResource, SystemClock, UuidGenerator,
};

use crate::error::ClientError;
use crate::handler::ResourceHandler;
use crate::transport::{BusEvent, EventBus, EventFilter};

/// Which side of the protocol a client plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The management plane: publishes specs, receives statuses.
    Source,
    /// A device: publishes its status, receives its spec.
    Agent,
}

impl Role {
    /// Direction this role publishes.
    pub fn outbound(self) -> SubResource {
        match self {
            Role::Source => SubResource::Spec,
            Role::Agent => SubResource::Status,
        }
    }

    /// Direction this role receives.
    pub fn inbound(self) -> SubResource {
        self.outbound().opposite()
    }
}

/// Function computing the dedup hash of an outbound status.
pub type StatusHashFn<K> = fn(&Resource<K>) -> Result<ContentHash, HashError>;

/// Collaborators a client is built with.
pub struct ClientOptions<K: ResourceKind> {
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    /// Consulted on resync.
    pub lister: Arc<dyn Lister<K>>,
    pub status_hash: StatusHashFn<K>,
}

impl<K: ResourceKind> Default for ClientOptions<K> {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
            lister: Arc::new(StaticLister::<K>::empty()),
            status_hash: status_hash::<K>,
        }
    }
}

impl<K: ResourceKind> ClientOptions<K> {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_lister(mut self, lister: Arc<dyn Lister<K>>) -> Self {
        self.lister = lister;
        self
    }

    pub fn with_status_hash(mut self, status_hash: StatusHashFn<K>) -> Self {
        self.status_hash = status_hash;
        self
    }
}

/// Result of a publish call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The bus accepted the envelope.
    Published,
    /// The status equals the last one published for this resource; nothing
    /// was sent.
    Suppressed,
}

/// Publishes one direction of `K` and subscribes to the other.
pub struct ResourceClient<K: ResourceKind> {
    inner: Arc<ClientInner<K>>,
}

impl<K: ResourceKind> Clone for ResourceClient<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ClientInner<K: ResourceKind> {
    role: Role,
    identity: String,
    bus: Arc<dyn EventBus>,
    outbound: Codec<K>,
    inbound: Codec<K>,
    lister: Arc<dyn Lister<K>>,
    status_hash: StatusHashFn<K>,
    /// Last successfully published status hash per resource. A slot stays
    /// locked from the dedup check until the publish settles.
    published: Mutex<HashMap<ResourceId, HashSlot>>,
}

type HashSlot = Arc<tokio::sync::Mutex<Option<ContentHash>>>;

impl<K: ResourceKind> ResourceClient<K> {
    /// Build a client for `role` that stamps envelopes with `identity`.
    pub fn new(
        role: Role,
        identity: impl Into<String>,
        bus: Arc<dyn EventBus>,
        options: ClientOptions<K>,
    ) -> Self {
        let outbound = Codec::new(role.outbound(), Arc::clone(&options.clock), Arc::clone(&options.ids));
        let inbound = Codec::new(role.inbound(), options.clock, options.ids);
        Self {
            inner: Arc::new(ClientInner {
                role,
                identity: identity.into(),
                bus,
                outbound,
                inbound,
                lister: options.lister,
                status_hash: options.status_hash,
                published: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Identity used as the envelope source.
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// The `update_request` event type this client publishes.
    pub fn outbound_event_type(&self) -> EventType {
        self.inner.outbound.event_type()
    }

    /// Filter registered by [`subscribe`](Self::subscribe).
    ///
    /// An agent only listens to its own routing key.
    pub fn filter(&self) -> EventFilter {
        let filter = EventFilter::all(K::DATA_TYPE, self.inner.role.inbound());
        match self.inner.role {
            Role::Source => filter,
            Role::Agent => filter.for_cluster(self.inner.identity.clone()),
        }
    }

    /// Encode `resource` and hand it to the bus.
    ///
    /// In the status direction an unchanged status is suppressed. The hash
    /// is only recorded once the bus accepts the envelope, so a failed
    /// publish is attempted again next time. Concurrent publishes for the
    /// same resource are serialized, so an identical status is sent once.
    pub async fn publish(
        &self,
        event_type: &EventType,
        resource: &Resource<K>,
    ) -> Result<PublishOutcome, ClientError> {
        if self.inner.outbound.field() == SubResource::Spec {
            let envelope = self.inner.outbound.encode(&self.inner.identity, event_type, resource)?;
            self.send(envelope).await?;
            return Ok(PublishOutcome::Published);
        }

        let hash = (self.inner.status_hash)(resource)?;
        let slot = self.slot(&resource.id);
        let mut last = slot.lock().await;
        if *last == Some(hash) {
            debug!(resource_id = %resource.id, hash = %hash, "status unchanged, publish suppressed");
            return Ok(PublishOutcome::Suppressed);
        }

        let envelope = self.inner.outbound.encode(&self.inner.identity, event_type, resource)?;
        self.send(envelope).await?;
        *last = Some(hash);
        Ok(PublishOutcome::Published)
    }

    /// Drop the remembered status hash of `id`, so its next publish is sent.
    pub fn forget(&self, id: &ResourceId) {
        self.inner.published.lock().remove(id);
    }

    /// Re-publish every resource the lister returns, bypassing dedup.
    ///
    /// Remembered hashes of resources the lister no longer returns are
    /// dropped. Returns how many envelopes were sent.
    pub async fn resync(&self) -> Result<usize, ClientError> {
        let mut options = ListOptions::for_source(self.inner.identity.clone());
        if self.inner.role == Role::Agent {
            options = options.cluster(self.inner.identity.clone());
        }

        let field = self.inner.outbound.field();
        let event_type = self.outbound_event_type();
        let listed = self.inner.lister.list(&options);
        let mut sent = 0;

        if field == SubResource::Status {
            let keep: HashSet<&ResourceId> = listed.iter().map(|r| &r.id).collect();
            self.inner.published.lock().retain(|id, _| keep.contains(id));
        }

        for resource in &listed {
            if !resource.has(field) {
                debug!(resource_id = %resource.id, field = %field, "skipping listed resource without payload");
                continue;
            }
            if field == SubResource::Spec {
                let envelope = self.inner.outbound.encode(&self.inner.identity, &event_type, resource)?;
                self.send(envelope).await?;
            } else {
                let hash = (self.inner.status_hash)(resource)?;
                let slot = self.slot(&resource.id);
                let mut last = slot.lock().await;
                let envelope = self.inner.outbound.encode(&self.inner.identity, &event_type, resource)?;
                self.send(envelope).await?;
                *last = Some(hash);
            }
            sent += 1;
        }

        Ok(sent)
    }

    fn slot(&self, id: &ResourceId) -> HashSlot {
        Arc::clone(self.inner.published.lock().entry(id.clone()).or_default())
    }

    /// Register with the bus and start dispatching inbound events to
    /// `handlers`.
    ///
    /// Returns once the bus has accepted the subscription. The spawned task
    /// ends when `cancel` fires or the bus closes the subscription.
    pub async fn subscribe(
        &self,
        cancel: CancellationToken,
        handlers: Vec<Arc<dyn ResourceHandler<K>>>,
    ) -> Result<JoinHandle<()>, ClientError> {
        let mut subscription = self.inner.bus.subscribe(self.filter()).await?;
        let client = self.clone();

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(identity = %client.inner.identity, "subscription cancelled");
                        break;
                    }
                    event = subscription.recv() => match event {
                        Some(BusEvent::Delivered(envelope)) => client.dispatch(&envelope, &handlers).await,
                        Some(BusEvent::Reconnected) => match client.resync().await {
                            Ok(sent) => info!(identity = %client.inner.identity, sent, "resynced after reconnect"),
                            Err(e) => warn!(identity = %client.inner.identity, error = %e, "resync after reconnect failed"),
                        },
                        None => {
                            debug!(identity = %client.inner.identity, "subscription closed by bus");
                            break;
                        }
                    }
                }
            }
        }))
    }

    async fn send(&self, envelope: Envelope) -> Result<(), ClientError> {
        let event_id = envelope.id.clone();
        self.inner.bus.publish(envelope).await.map_err(|e| {
            warn!(event_id = %event_id, error = %e, "publish failed");
            ClientError::from(e)
        })
    }

    async fn dispatch(&self, envelope: &Envelope, handlers: &[Arc<dyn ResourceHandler<K>>]) {
        let resource = match self.inner.inbound.decode(envelope) {
            Ok(resource) => resource,
            Err(e) => {
                warn!(
                    event_id = %envelope.id,
                    event_type = %envelope.event_type,
                    error = %e,
                    "dropping undecodable event"
                );
                return;
            }
        };

        let action = ResourceAction::classify(&resource);
        debug!(event_id = %envelope.id, resource_id = %resource.id, ?action, "dispatching event");

        for handler in handlers {
            if let Err(e) = handler.handle(action, resource.clone()).await {
                warn!(
                    event_id = %envelope.id,
                    resource_id = %resource.id,
                    error = %e,
                    "handler failed"
                );
            }
        }
    }
}
