//! Views of one kind of object across every member cluster.
//!
//! A [`FederatedInformer`] tracks which member clusters are ready and keeps a
//! watched cache of the target objects in each of them. Controllers read the
//! caches through a [`FederatedReadOnlyStore`] and write through
//! [`ClusterOperations`].

use std::fmt::Debug;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod cluster;
pub mod memory;

pub use cluster::{ClusterRegistry, KubeClusterOperations, KubeFederatedInformer};
pub use memory::InMemoryFederation;

/// A member cluster of the federation.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cluster {
    /// The cluster's name.
    pub name: String,
}

impl Cluster {
    /// A cluster called `name`.
    pub fn new(name: &str) -> Self {
        Cluster {
            name: name.to_string(),
        }
    }
}

/// An object together with the cluster it was read from.
#[derive(Clone, Debug, PartialEq)]
pub struct FederatedObject<K> {
    /// Cluster the object lives in.
    pub cluster: String,
    /// The object.
    pub object: K,
}

/// Notifications that drive a federated controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchNotification {
    /// The desired object changed in the local (federation) store.
    Local(crate::NamespacedName),
    /// A target object changed in a member cluster.
    Cluster {
        /// The member cluster.
        cluster: String,
        /// Key of the changed object.
        key: crate::NamespacedName,
    },
    /// A member cluster became ready.
    ClusterAvailable(String),
    /// A member cluster stopped being ready.
    ClusterUnavailable(String),
}

/// Target objects cached from every ready member cluster.
#[async_trait::async_trait]
pub trait FederatedReadOnlyStore<K>: Send + Sync {
    /// Every cached object in every ready cluster.
    async fn list(&self) -> anyhow::Result<Vec<FederatedObject<K>>>;
    /// Every cached object in `cluster`.
    async fn list_from_cluster(&self, cluster: &str) -> anyhow::Result<Vec<K>>;
    /// The object with `key` in `cluster`.
    async fn get_by_key(&self, cluster: &str, key: &str) -> anyhow::Result<Option<K>>;
    /// The object with `key` in every ready cluster that has it.
    async fn get_from_all_clusters(&self, key: &str) -> anyhow::Result<Vec<FederatedObject<K>>>;
    /// Whether the caches of all `clusters` hold their initial listing.
    async fn clusters_synced(&self, clusters: &[Cluster]) -> bool;
}

/// Tracks member cluster readiness and the target caches.
#[async_trait::async_trait]
pub trait FederatedInformer<K>: Send + Sync {
    /// Every cluster currently ready.
    async fn get_ready_clusters(&self) -> anyhow::Result<Vec<Cluster>>;
    /// The cluster called `name`, if it is ready.
    async fn get_ready_cluster(&self, name: &str) -> anyhow::Result<Option<Cluster>>;
    /// Whether the cluster list itself has been loaded.
    async fn clusters_synced(&self) -> bool;
    /// The target caches.
    fn target_store(&self) -> Arc<dyn FederatedReadOnlyStore<K>>;
}

/// Writes target objects to member clusters.
#[async_trait::async_trait]
pub trait ClusterOperations<K>: Send + Sync {
    /// Creates `object` in `cluster`.
    async fn add(&self, cluster: &str, object: &K) -> anyhow::Result<()>;
    /// Replaces `object` in `cluster`.
    async fn update(&self, cluster: &str, object: &K) -> anyhow::Result<()>;
    /// Deletes `object` from `cluster`.
    async fn delete(&self, cluster: &str, object: &K) -> anyhow::Result<()>;
}

/// Objects that can be federated through the kube API.
pub trait FederatedResource:
    kube::Resource<DynamicType = ()>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<T> FederatedResource for T where
    T: kube::Resource<DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}
