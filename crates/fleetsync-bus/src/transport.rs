//! Event bus abstraction.
//!
//! The bus delivers envelopes at least once and possibly out of order. It
//! exposes publish and filtered subscribe; everything protocol-specific
//! (codecs, dedup, handler dispatch) lives in the resource client.

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use fleetsync_core::{Envelope, SubResource};

use crate::error::Result;

/// Buffered events per subscription before delivery applies backpressure.
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// What a subscription yields.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// An envelope matching the subscription filter.
    Delivered(Envelope),
    /// The transport re-established its connection; state may have been
    /// missed while it was down.
    Reconnected,
}

/// Selects which envelopes a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Kind segment of the event type.
    pub data_type: String,
    /// Direction carried by the event.
    pub sub_resource: SubResource,
    /// Only envelopes whose `clustername` equals this, when set.
    pub cluster_name: Option<String>,
}

impl EventFilter {
    /// Every event of `data_type` carrying `sub_resource`.
    pub fn all(data_type: impl Into<String>, sub_resource: SubResource) -> Self {
        Self {
            data_type: data_type.into(),
            sub_resource,
            cluster_name: None,
        }
    }

    /// Restrict to a single routing key.
    pub fn for_cluster(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = Some(cluster_name.into());
        self
    }

    /// Whether `envelope` passes this filter.
    ///
    /// A missing `clustername` only passes an unscoped filter, so the
    /// decoder can still report it.
    pub fn matches(&self, envelope: &Envelope) -> bool {
        let Ok(event_type) = envelope.parsed_type() else {
            return false;
        };
        if event_type.data_type != self.data_type || event_type.sub_resource != self.sub_resource {
            return false;
        }
        match &self.cluster_name {
            Some(cluster) => envelope.cluster_name() == Some(cluster.as_str()),
            None => true,
        }
    }
}

/// Why no filter could ever accept `envelope`, if that is the case.
pub fn unroutable_reason(envelope: &Envelope) -> Option<&'static str> {
    if envelope.parsed_type().is_err() {
        Some("unparseable event type")
    } else if envelope.cluster_name().is_none() {
        Some("missing clustername")
    } else {
        None
    }
}

/// Outcome of a non-blocking delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Matching subscriptions that were full.
    pub dropped: usize,
}

/// Receiving half of a bus subscription.
#[derive(Debug)]
pub struct Subscription {
    filter: EventFilter,
    rx: mpsc::Receiver<BusEvent>,
}

impl Subscription {
    /// The filter this subscription was registered with.
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Wait for the next event. Returns `None` once the bus drops the
    /// subscription.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }
}

/// Fan-out of delivered envelopes to matching subscriptions.
///
/// Shared by every bus implementation.
#[derive(Default)]
pub struct Router {
    routes: RwLock<Vec<Route>>,
}

struct Route {
    filter: EventFilter,
    tx: mpsc::Sender<BusEvent>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.routes.write().push(Route {
            filter: filter.clone(),
            tx,
        });
        Subscription { filter, rx }
    }

    /// Deliver `envelope` to every matching subscription, returning how many
    /// received it. Waits while a matching subscription's buffer is full.
    pub async fn deliver(&self, envelope: &Envelope) -> usize {
        let targets = self.targets(envelope);
        let mut delivered = 0;
        for tx in targets {
            if tx.send(BusEvent::Delivered(envelope.clone())).await.is_ok() {
                delivered += 1;
            }
        }
        self.prune();
        delivered
    }

    /// Like [`deliver`](Self::deliver) but never waits: a subscription whose
    /// buffer is full misses the envelope.
    pub fn try_deliver(&self, envelope: &Envelope) -> Delivery {
        let targets = self.targets(envelope);
        let mut delivery = Delivery::default();
        for tx in targets {
            match tx.try_send(BusEvent::Delivered(envelope.clone())) {
                Ok(()) => delivery.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        event_id = %envelope.id,
                        event_type = %envelope.event_type,
                        "subscription buffer full, event dropped"
                    );
                    delivery.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        self.prune();
        delivery
    }

    fn targets(&self, envelope: &Envelope) -> Vec<mpsc::Sender<BusEvent>> {
        let targets: Vec<_> = self
            .routes
            .read()
            .iter()
            .filter(|route| route.filter.matches(envelope))
            .map(|route| route.tx.clone())
            .collect();

        if targets.is_empty() {
            match unroutable_reason(envelope) {
                Some(reason) => warn!(
                    event_id = %envelope.id,
                    event_type = %envelope.event_type,
                    reason,
                    "dropping unroutable event"
                ),
                None => trace!(event_id = %envelope.id, event_type = %envelope.event_type, "no subscriber for event"),
            }
        }
        targets
    }

    /// Tell every subscription the transport reconnected.
    pub async fn reconnected(&self) {
        let targets: Vec<mpsc::Sender<BusEvent>> =
            self.routes.read().iter().map(|route| route.tx.clone()).collect();
        for tx in targets {
            let _ = tx.send(BusEvent::Reconnected).await;
        }
        self.prune();
    }

    /// Filters of the live subscriptions.
    pub fn filters(&self) -> Vec<EventFilter> {
        self.routes
            .read()
            .iter()
            .filter(|route| !route.tx.is_closed())
            .map(|route| route.filter.clone())
            .collect()
    }

    /// Drop every subscription; receivers then see the end of the stream.
    pub fn close(&self) {
        self.routes.write().clear();
    }

    fn prune(&self) {
        self.routes.write().retain(|route| !route.tx.is_closed());
    }
}

/// A publish/subscribe event bus.
///
/// Implementations must be safe to share across tasks: one bus instance
/// serves every publish and subscribe of a role client.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Hand an envelope to the transport.
    ///
    /// Returns once the transport has accepted it; does not wait for remote
    /// acknowledgment.
    async fn publish(&self, envelope: Envelope) -> Result<()>;

    /// Register interest in envelopes matching `filter`.
    async fn subscribe(&self, filter: EventFilter) -> Result<Subscription>;

    /// Identity this bus connection was opened with.
    fn node_id(&self) -> &str;
}

/// In-process bus for tests and single-binary deployments.
///
/// Every bus connected to the same [`MemoryNetwork`] sees every other's
/// publishes.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::error::BusError;

    /// A publish recorded by the network.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PublishedEvent {
        pub from: String,
        pub envelope: Envelope,
    }

    /// Shared state for the memory network.
    pub struct MemoryNetwork {
        router: Router,
        published: Mutex<Vec<PublishedEvent>>,
        offline: AtomicBool,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Open a bus connection on this network.
        pub fn connect(self: &Arc<Self>, node_id: impl Into<String>) -> MemoryBus {
            MemoryBus {
                node_id: node_id.into(),
                network: Arc::clone(self),
            }
        }

        /// Every envelope successfully published so far, in order.
        pub fn published(&self) -> Vec<PublishedEvent> {
            self.published.lock().clone()
        }

        /// Number of envelopes successfully published so far.
        pub fn publish_count(&self) -> usize {
            self.published.lock().len()
        }

        /// While offline, every publish fails with a transport error.
        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        /// Deliver a raw envelope as if it arrived from the wire.
        pub async fn inject(&self, envelope: Envelope) -> usize {
            self.router.deliver(&envelope).await
        }

        /// Signal a reconnect to every subscription.
        pub async fn simulate_reconnect(&self) {
            self.router.reconnected().await;
        }
    }

    impl Default for MemoryNetwork {
        fn default() -> Self {
            Self {
                router: Router::new(),
                published: Mutex::new(Vec::new()),
                offline: AtomicBool::new(false),
            }
        }
    }

    /// A connection to a [`MemoryNetwork`].
    #[derive(Clone)]
    pub struct MemoryBus {
        node_id: String,
        network: Arc<MemoryNetwork>,
    }

    impl MemoryBus {
        /// The network this bus is connected to.
        pub fn network(&self) -> &Arc<MemoryNetwork> {
            &self.network
        }
    }

    #[async_trait]
    impl EventBus for MemoryBus {
        async fn publish(&self, envelope: Envelope) -> Result<()> {
            if self.network.offline.load(Ordering::SeqCst) {
                return Err(BusError::Transport("network offline".into()));
            }
            self.network.published.lock().push(PublishedEvent {
                from: self.node_id.clone(),
                envelope: envelope.clone(),
            });
            self.network.router.deliver(&envelope).await;
            Ok(())
        }

        async fn subscribe(&self, filter: EventFilter) -> Result<Subscription> {
            Ok(self.network.router.subscribe(filter))
        }

        fn node_id(&self) -> &str {
            &self.node_id
        }
    }
}
