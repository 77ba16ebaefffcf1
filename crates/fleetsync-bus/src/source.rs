//! Management-plane client: publishes specs, receives every device status.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fleetsync_core::{DeviceKind, Resource, ResourceKind};

use crate::client::{ClientOptions, PublishOutcome, ResourceClient, Role};
use crate::error::ClientError;
use crate::handler::ResourceHandler;
use crate::mqtt::{BusConfig, MqttBus};
use crate::transport::EventBus;

/// Identity the source stamps on every envelope.
pub const SOURCE_ID: &str = "fleetsync";

/// The source role client.
pub struct SourceClient<K: ResourceKind = DeviceKind> {
    client: ResourceClient<K>,
}

impl<K: ResourceKind> Clone for SourceClient<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<K: ResourceKind> SourceClient<K> {
    /// Connect to the MQTT broker with default collaborators.
    pub async fn connect(config: &BusConfig) -> Result<Self, ClientError> {
        Self::connect_with(config, ClientOptions::default()).await
    }

    /// Connect to the MQTT broker with explicit collaborators.
    pub async fn connect_with(config: &BusConfig, options: ClientOptions<K>) -> Result<Self, ClientError> {
        let bus = MqttBus::connect(SOURCE_ID, config).await?;
        Ok(Self::with_bus(Arc::new(bus), options))
    }

    /// Build over an existing bus.
    pub fn with_bus(bus: Arc<dyn EventBus>, options: ClientOptions<K>) -> Self {
        Self {
            client: ResourceClient::new(Role::Source, SOURCE_ID, bus, options),
        }
    }

    /// Publish a resource's spec (and deletion marker) to its device.
    pub async fn publish_spec(&self, resource: &Resource<K>) -> Result<PublishOutcome, ClientError> {
        self.client
            .publish(&self.client.outbound_event_type(), resource)
            .await
    }

    /// Receive status updates from every device.
    pub async fn subscribe_status(
        &self,
        cancel: CancellationToken,
        handlers: Vec<Arc<dyn ResourceHandler<K>>>,
    ) -> Result<JoinHandle<()>, ClientError> {
        self.client.subscribe(cancel, handlers).await
    }

    /// The underlying generic client.
    pub fn client(&self) -> &ResourceClient<K> {
        &self.client
    }
}
