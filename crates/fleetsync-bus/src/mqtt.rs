//! MQTT event bus over rumqttc.
//!
//! Envelopes travel as CloudEvents structured-mode JSON on
//! `<prefix>/<clustername>/<sub-resource>` topics with QoS 1. The event
//! loop runs on its own task; incoming publishes are fanned out through a
//! [`Router`], and a reconnect re-subscribes every live filter before
//! emitting [`BusEvent::Reconnected`](crate::BusEvent::Reconnected).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration,
    Transport,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fleetsync_core::Envelope;

use crate::error::{BusError, Result};
use crate::transport::{Delivery, EventBus, EventFilter, Router, Subscription};

/// Delay between reconnect attempts after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Connection settings for the MQTT bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// `mqtts://host:port`, `mqtt://host:port`, or `host:port` (TLS).
    pub endpoint: String,
    /// PEM trust anchor for the broker certificate.
    pub ca_file: PathBuf,
    /// First topic segment.
    pub topic_prefix: String,
    pub keep_alive_secs: u64,
    /// How long construction waits for the broker's CONNACK.
    pub connect_timeout_secs: u64,
    /// Capacity of the client request channel.
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint: "mqtts://localhost:8883".into(),
            ca_file: PathBuf::from("/etc/fleetsync/certs/ca.crt"),
            topic_prefix: "fleetsync".into(),
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            channel_capacity: 64,
        }
    }
}

impl BusConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_ca_file(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.ca_file = ca_file.into();
        self
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }
}

/// A parsed broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Endpoint {
    /// Parse `mqtts://host:port`, `mqtt://host:port`, or `host:port`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (tls, rest) = match raw.split_once("://") {
            Some(("mqtts", rest)) | Some(("ssl", rest)) => (true, rest),
            Some(("mqtt", rest)) | Some(("tcp", rest)) => (false, rest),
            Some((scheme, _)) => {
                return Err(BusError::Config(format!("unsupported endpoint scheme: {}", scheme)))
            }
            None => (true, raw),
        };
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| BusError::Config(format!("endpoint {} has no port", raw)))?;
        if host.is_empty() {
            return Err(BusError::Config(format!("endpoint {} has no host", raw)));
        }
        let port = port
            .parse()
            .map_err(|_| BusError::Config(format!("endpoint {} has an invalid port", raw)))?;
        Ok(Self {
            host: host.to_owned(),
            port,
            tls,
        })
    }
}

/// Topic for an envelope's routing key and direction.
pub fn topic_for(prefix: &str, cluster_name: &str, sub_resource: &str) -> String {
    format!("{}/{}/{}", prefix, cluster_name, sub_resource)
}

/// Topic filter covering a subscription filter.
pub fn topic_filter(prefix: &str, filter: &EventFilter) -> String {
    let cluster = filter.cluster_name.as_deref().unwrap_or("+");
    topic_for(prefix, cluster, filter.sub_resource.as_str())
}

/// MQTT-backed [`EventBus`].
pub struct MqttBus {
    node_id: String,
    prefix: String,
    client: AsyncClient,
    router: Arc<Router>,
    shutdown: CancellationToken,
}

impl MqttBus {
    /// Connect as `node_id` and wait for the broker to accept the session.
    ///
    /// Fails if the endpoint is malformed, the CA file cannot be read, or no
    /// successful CONNACK arrives within the connect timeout.
    pub async fn connect(node_id: impl Into<String>, config: &BusConfig) -> Result<Self> {
        let node_id = node_id.into();
        let endpoint = Endpoint::parse(&config.endpoint)?;

        let mut options = MqttOptions::new(node_id.clone(), endpoint.host.clone(), endpoint.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(true);

        if endpoint.tls {
            let ca = std::fs::read(&config.ca_file).map_err(|e| {
                BusError::Config(format!(
                    "cannot read CA certificate {}: {}",
                    config.ca_file.display(),
                    e
                ))
            })?;
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            }));
        } else {
            warn!(endpoint = %config.endpoint, "connecting to MQTT broker without TLS");
        }

        let (client, mut eventloop) = AsyncClient::new(options, config.channel_capacity);

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        match tokio::time::timeout(timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                return Err(BusError::Connect {
                    endpoint: config.endpoint.clone(),
                    reason,
                })
            }
            Err(_) => {
                return Err(BusError::Connect {
                    endpoint: config.endpoint.clone(),
                    reason: format!("no CONNACK within {:?}", timeout),
                })
            }
        }
        info!(node_id = %node_id, endpoint = %config.endpoint, "connected to MQTT broker");

        let router = Arc::new(Router::new());
        let shutdown = CancellationToken::new();
        tokio::spawn(drive(
            eventloop,
            client.clone(),
            Arc::clone(&router),
            config.topic_prefix.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            node_id,
            prefix: config.topic_prefix.clone(),
            client,
            router,
            shutdown,
        })
    }

    /// Disconnect from the broker and end every subscription.
    pub async fn disconnect(&self) -> Result<()> {
        self.shutdown.cancel();
        self.router.close();
        self.client
            .disconnect()
            .await
            .map_err(|e| BusError::Transport(e.to_string()))
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl EventBus for MqttBus {
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(BusError::Closed);
        }
        let event_type = envelope.parsed_type().map_err(|e| BusError::Unroutable {
            id: envelope.id.clone(),
            reason: e.to_string(),
        })?;
        let cluster = envelope.cluster_name().ok_or_else(|| BusError::Unroutable {
            id: envelope.id.clone(),
            reason: "missing clustername".into(),
        })?;
        let topic = topic_for(&self.prefix, cluster, event_type.sub_resource.as_str());
        let payload = envelope.to_json_bytes().map_err(|e| BusError::Unroutable {
            id: envelope.id.clone(),
            reason: e.to_string(),
        })?;

        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))
    }

    async fn subscribe(&self, filter: EventFilter) -> Result<Subscription> {
        if self.shutdown.is_cancelled() {
            return Err(BusError::Closed);
        }
        let topic = topic_filter(&self.prefix, &filter);
        let subscription = self.router.subscribe(filter);
        self.client
            .subscribe(topic.clone(), QoS::AtLeastOnce)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;
        debug!(topic = %topic, "subscribed");
        Ok(subscription)
    }

    fn node_id(&self) -> &str {
        &self.node_id
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> std::result::Result<(), String> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(format!("broker refused connection: {:?}", ack.code))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }
}

/// Poll the event loop until shutdown, routing publishes and handling
/// reconnects.
///
/// Nothing in here waits on a subscriber: a stalled handler must not stop
/// keep-alives and acknowledgements from flowing.
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    router: Arc<Router>,
    prefix: String,
    shutdown: CancellationToken,
) {
    let mut connected = true;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    route(&router, &publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) if !connected => {
                    connected = true;
                    // The request channel is drained by this loop, so the
                    // non-blocking variant is required here.
                    for filter in router.filters() {
                        let topic = topic_filter(&prefix, &filter);
                        if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                            warn!(topic = %topic, error = %e, "failed to re-subscribe");
                        }
                    }
                    info!("reconnected to MQTT broker");
                    let router = Arc::clone(&router);
                    tokio::spawn(async move { router.reconnected().await });
                }
                Ok(_) => {}
                Err(e) => {
                    if connected {
                        warn!(error = %e, "MQTT connection lost");
                    }
                    connected = false;
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    router.close();
    debug!("MQTT event loop stopped");
}

/// Hand one incoming message to the router without waiting.
///
/// Every topic on this connection was subscribed by a filter, so a message
/// no filter accepts is reported.
fn route(router: &Router, topic: &str, payload: &[u8]) -> Delivery {
    let envelope = match Envelope::from_json_slice(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(topic = %topic, error = %e, "dropping message that is not an event envelope");
            return Delivery::default();
        }
    };
    let delivery = router.try_deliver(&envelope);
    if delivery == Delivery::default() {
        warn!(
            topic = %topic,
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            "no subscription accepted event"
        );
    }
    delivery
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsync_core::{DeviceKind, ResourceKind, SubResource};

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(
            Endpoint::parse("mqtts://broker.example:8883").unwrap(),
            Endpoint { host: "broker.example".into(), port: 8883, tls: true }
        );
        assert_eq!(
            Endpoint::parse("mqtt://127.0.0.1:1883").unwrap(),
            Endpoint { host: "127.0.0.1".into(), port: 1883, tls: false }
        );
        assert!(Endpoint::parse("broker.example:8883").unwrap().tls);
    }

    #[test]
    fn test_endpoint_parse_errors() {
        assert!(matches!(Endpoint::parse("broker.example"), Err(BusError::Config(_))));
        assert!(matches!(Endpoint::parse("mqtts://:8883"), Err(BusError::Config(_))));
        assert!(matches!(Endpoint::parse("http://broker:80"), Err(BusError::Config(_))));
        assert!(matches!(Endpoint::parse("broker:port"), Err(BusError::Config(_))));
    }

    #[test]
    fn test_topics() {
        let source = EventFilter::all(DeviceKind::DATA_TYPE, SubResource::Status);
        assert_eq!(topic_filter("fleetsync", &source), "fleetsync/+/status");

        let agent = EventFilter::all(DeviceKind::DATA_TYPE, SubResource::Spec).for_cluster("dev-1");
        assert_eq!(topic_filter("fleetsync", &agent), "fleetsync/dev-1/spec");
    }

    #[tokio::test]
    async fn test_route_never_waits_on_a_full_subscription() {
        let router = Router::new();
        let _stalled = router.subscribe(EventFilter::all(DeviceKind::DATA_TYPE, SubResource::Status));

        let codec = fleetsync_core::Codec::<DeviceKind>::system(SubResource::Status);
        let device = fleetsync_core::Device::with_status("dev-1", "1", Default::default());
        let payload = codec
            .encode("dev-1", &codec.event_type(), &device)
            .unwrap()
            .to_json_bytes()
            .unwrap();

        for _ in 0..crate::transport::SUBSCRIPTION_BUFFER {
            assert_eq!(route(&router, "fleetsync/dev-1/status", &payload).delivered, 1);
        }
        assert_eq!(
            route(&router, "fleetsync/dev-1/status", &payload),
            Delivery { delivered: 0, dropped: 1 }
        );
        assert_eq!(route(&router, "fleetsync/dev-1/status", b"{not json"), Delivery::default());
    }

    #[tokio::test]
    async fn test_connect_fails_on_unreadable_ca() {
        let dir = tempfile::tempdir().unwrap();
        let config = BusConfig::default()
            .with_endpoint("mqtts://127.0.0.1:8883")
            .with_ca_file(dir.path().join("missing.crt"));

        match MqttBus::connect("fleetsync", &config).await {
            Err(BusError::Config(msg)) => assert!(msg.contains("missing.crt")),
            Err(other) => panic!("expected config error, got {}", other),
            Ok(_) => panic!("connect should fail"),
        }
    }

    #[tokio::test]
    async fn test_connect_fails_when_unreachable() {
        let config = BusConfig {
            endpoint: "mqtt://127.0.0.1:1".into(),
            connect_timeout_secs: 2,
            ..BusConfig::default()
        };
        assert!(matches!(
            MqttBus::connect("fleetsync", &config).await,
            Err(BusError::Connect { .. })
        ));
    }
}
