//! Device-side client: publishes its own status, receives its own spec.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fleetsync_core::{DeviceKind, Resource, ResourceKind};

use crate::client::{ClientOptions, PublishOutcome, ResourceClient, Role};
use crate::error::ClientError;
use crate::handler::ResourceHandler;
use crate::mqtt::{BusConfig, MqttBus};
use crate::transport::EventBus;

/// The agent role client. Its identity is the device name.
pub struct AgentClient<K: ResourceKind = DeviceKind> {
    client: ResourceClient<K>,
}

impl<K: ResourceKind> Clone for AgentClient<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<K: ResourceKind> AgentClient<K> {
    /// Connect to the MQTT broker as `device_name`.
    pub async fn connect(device_name: impl Into<String>, config: &BusConfig) -> Result<Self, ClientError> {
        Self::connect_with(device_name, config, ClientOptions::default()).await
    }

    pub async fn connect_with(
        device_name: impl Into<String>,
        config: &BusConfig,
        options: ClientOptions<K>,
    ) -> Result<Self, ClientError> {
        let device_name = device_name.into();
        let bus = MqttBus::connect(device_name.clone(), config).await?;
        Ok(Self::with_bus(device_name, Arc::new(bus), options))
    }

    /// Build over an existing bus.
    pub fn with_bus(
        device_name: impl Into<String>,
        bus: Arc<dyn EventBus>,
        options: ClientOptions<K>,
    ) -> Self {
        Self {
            client: ResourceClient::new(Role::Agent, device_name, bus, options),
        }
    }

    pub fn device_name(&self) -> &str {
        self.client.identity()
    }

    /// Publish this device's status. Suppressed when unchanged since the
    /// last successful publish.
    pub async fn publish_status(&self, resource: &Resource<K>) -> Result<PublishOutcome, ClientError> {
        self.client
            .publish(&self.client.outbound_event_type(), resource)
            .await
    }

    /// Receive spec updates addressed to this device.
    pub async fn subscribe_spec(
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
