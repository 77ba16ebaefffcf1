//! Subscriber callbacks.

use std::future::Future;

use async_trait::async_trait;

use fleetsync_core::{Resource, ResourceAction, ResourceKind};

/// Receives decoded resources from a subscription.
///
/// Handlers run on the subscription task, one event at a time. An error is
/// logged by the dispatcher and does not stop the subscription.
#[async_trait]
pub trait ResourceHandler<K: ResourceKind>: Send + Sync {
    async fn handle(&self, action: ResourceAction, resource: Resource<K>) -> anyhow::Result<()>;
}

#[async_trait]
impl<K, F, Fut> ResourceHandler<K> for F
where
    K: ResourceKind,
    F: Fn(ResourceAction, Resource<K>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, action: ResourceAction, resource: Resource<K>) -> anyhow::Result<()> {
        (self)(action, resource).await
    }
}
