//! Resource listers used to re-announce known state.

use crate::resource::{Resource, ResourceKind};
use crate::types::ResourceId;

/// Options passed to [`Lister::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Identity of the node asking.
    pub source: String,
    /// Restrict the listing to one routing key.
    pub cluster_name: Option<ResourceId>,
}

impl ListOptions {
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            cluster_name: None,
        }
    }

    pub fn cluster(mut self, cluster_name: impl Into<ResourceId>) -> Self {
        self.cluster_name = Some(cluster_name.into());
        self
    }
}

/// Returns the resources currently known to the caller.
pub trait Lister<K: ResourceKind>: Send + Sync {
    fn list(&self, options: &ListOptions) -> Vec<Resource<K>>;
}

/// A lister over a fixed set of resources.
#[derive(Debug, Clone)]
pub struct StaticLister<K: ResourceKind> {
    resources: Vec<Resource<K>>,
}

impl<K: ResourceKind> StaticLister<K> {
    pub fn new(resources: Vec<Resource<K>>) -> Self {
        Self { resources }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl<K: ResourceKind> Default for StaticLister<K> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K: ResourceKind> Lister<K> for StaticLister<K> {
    fn list(&self, options: &ListOptions) -> Vec<Resource<K>> {
        self.resources
            .iter()
            .filter(|r| options.cluster_name.as_ref().map_or(true, |c| &r.id == c))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceKind, DeviceSpec};

    #[test]
    fn test_static_lister_preserves_order() {
        let lister = StaticLister::new(vec![
            Device::with_spec("dev-2", "1", DeviceSpec::new("1")),
            Device::with_spec("dev-1", "1", DeviceSpec::new("1")),
        ]);
        let ids: Vec<_> = lister
            .list(&ListOptions::for_source("fleetsync"))
            .into_iter()
            .map(|d| d.id.into_string())
            .collect();
        assert_eq!(ids, vec!["dev-2", "dev-1"]);
    }

    #[test]
    fn test_static_lister_filters_by_cluster() {
        let lister = StaticLister::new(vec![
            Device::with_spec("dev-1", "1", DeviceSpec::new("1")),
            Device::with_spec("dev-2", "1", DeviceSpec::new("1")),
        ]);
        let listed = lister.list(&ListOptions::for_source("dev-2").cluster("dev-2"));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id.as_str(), "dev-2");
    }

    #[test]
    fn test_empty_lister() {
        let lister = StaticLister::<DeviceKind>::empty();
        assert!(lister.list(&ListOptions::default()).is_empty());
    }
}
