//! A federation of in-memory clusters.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::{
    Cluster, ClusterOperations, FederatedInformer, FederatedObject, FederatedReadOnlyStore,
    WatchNotification,
};
use crate::store::{MemoryStore, Store};
use crate::NamespacedName;

struct Inner<K> {
    clusters: RwLock<BTreeMap<String, Arc<MemoryStore<K>>>>,
    failing: RwLock<HashSet<String>>,
    synced: AtomicBool,
    notifications: RwLock<Option<mpsc::Sender<WatchNotification>>>,
}

/// Member clusters backed by [`MemoryStore`]s.
///
/// Implements the informer, the read-only store and the write operations,
/// so a controller can be driven end to end without an API server. Writes
/// to a cluster can be made to fail with [`fail_writes`](Self::fail_writes).
pub struct InMemoryFederation<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for InMemoryFederation<K> {
    fn clone(&self) -> Self {
        InMemoryFederation {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for InMemoryFederation<K> {
    fn default() -> Self {
        InMemoryFederation {
            inner: Arc::new(Inner {
                clusters: RwLock::new(BTreeMap::new()),
                failing: RwLock::new(HashSet::new()),
                synced: AtomicBool::new(true),
                notifications: RwLock::new(None),
            }),
        }
    }
}

impl<K> InMemoryFederation<K>
where
    K: kube::Resource + Clone + Send + Sync + 'static,
{
    /// An empty, synced federation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends cluster and object notifications to `tx` from now on.
    pub async fn notify_to(&self, tx: mpsc::Sender<WatchNotification>) {
        *self.inner.notifications.write().await = Some(tx);
    }

    /// Marks the cluster list as loaded or not.
    pub fn set_synced(&self, synced: bool) {
        self.inner.synced.store(synced, Ordering::SeqCst);
    }

    /// Makes `name` ready with an empty, synced cache.
    pub async fn add_cluster(&self, name: &str) -> Arc<MemoryStore<K>> {
        let store = Arc::new(MemoryStore::new());
        store.mark_synced();
        self.inner
            .clusters
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&store));
        self.notify(WatchNotification::ClusterAvailable(name.to_string()))
            .await;
        store
    }

    /// Makes `name` not ready and drops its cache.
    pub async fn remove_cluster(&self, name: &str) {
        self.inner.clusters.write().await.remove(name);
        self.notify(WatchNotification::ClusterUnavailable(name.to_string()))
            .await;
    }

    /// The cache of cluster `name`, if it is ready.
    pub async fn cluster_store(&self, name: &str) -> Option<Arc<MemoryStore<K>>> {
        self.inner.clusters.read().await.get(name).cloned()
    }

    /// Makes every write to `cluster` fail, or succeed again.
    pub async fn fail_writes(&self, cluster: &str, fail: bool) {
        let mut failing = self.inner.failing.write().await;
        if fail {
            failing.insert(cluster.to_string());
        } else {
            failing.remove(cluster);
        }
    }

    async fn notify(&self, notification: WatchNotification) {
        let tx = self.inner.notifications.read().await.clone();
        if let Some(tx) = tx {
            if tx.send(notification).await.is_err() {
                debug!("notification receiver dropped");
            }
        }
    }

    async fn writable_store(&self, cluster: &str) -> anyhow::Result<Arc<MemoryStore<K>>> {
        if self.inner.failing.read().await.contains(cluster) {
            anyhow::bail!("cluster {} rejected the write", cluster);
        }
        self.cluster_store(cluster)
            .await
            .ok_or_else(|| anyhow::anyhow!("cluster {} is not ready", cluster))
    }
}

#[async_trait::async_trait]
impl<K> FederatedReadOnlyStore<K> for InMemoryFederation<K>
where
    K: kube::Resource + Clone + Send + Sync + 'static,
{
    async fn list(&self) -> anyhow::Result<Vec<FederatedObject<K>>> {
        let clusters = self.inner.clusters.read().await;
        let mut objects = Vec::new();
        for (cluster, store) in clusters.iter() {
            for object in store.list().await {
                objects.push(FederatedObject {
                    cluster: cluster.clone(),
                    object,
                });
            }
        }
        Ok(objects)
    }

    async fn list_from_cluster(&self, cluster: &str) -> anyhow::Result<Vec<K>> {
        match self.cluster_store(cluster).await {
            Some(store) => Ok(store.list().await),
            None => Ok(Vec::new()),
        }
    }

    async fn get_by_key(&self, cluster: &str, key: &str) -> anyhow::Result<Option<K>> {
        match self.cluster_store(cluster).await {
            Some(store) => Ok(store.get_by_key(key).await),
            None => anyhow::bail!("cluster {} is not ready", cluster),
        }
    }

    async fn get_from_all_clusters(&self, key: &str) -> anyhow::Result<Vec<FederatedObject<K>>> {
        let clusters = self.inner.clusters.read().await;
        let mut objects = Vec::new();
        for (cluster, store) in clusters.iter() {
            if let Some(object) = store.get_by_key(key).await {
                objects.push(FederatedObject {
                    cluster: cluster.clone(),
                    object,
                });
            }
        }
        Ok(objects)
    }

    async fn clusters_synced(&self, clusters: &[Cluster]) -> bool {
        let ready = self.inner.clusters.read().await;
        clusters.iter().all(|cluster| {
            ready
                .get(&cluster.name)
                .map_or(false, |store| store.has_synced())
        })
    }
}

#[async_trait::async_trait]
impl<K> FederatedInformer<K> for InMemoryFederation<K>
where
    K: kube::Resource + Clone + Send + Sync + 'static,
{
    async fn get_ready_clusters(&self) -> anyhow::Result<Vec<Cluster>> {
        Ok(self
            .inner
            .clusters
            .read()
            .await
            .keys()
            .map(|name| Cluster::new(name))
            .collect())
    }

    async fn get_ready_cluster(&self, name: &str) -> anyhow::Result<Option<Cluster>> {
        Ok(self
            .inner
            .clusters
            .read()
            .await
            .get(name)
            .map(|_| Cluster::new(name)))
    }

    async fn clusters_synced(&self) -> bool {
        self.inner.synced.load(Ordering::SeqCst)
    }

    fn target_store(&self) -> Arc<dyn FederatedReadOnlyStore<K>> {
        Arc::new(self.clone())
    }
}

#[async_trait::async_trait]
impl<K> ClusterOperations<K> for InMemoryFederation<K>
where
    K: kube::Resource + Clone + Send + Sync + 'static,
{
    async fn add(&self, cluster: &str, object: &K) -> anyhow::Result<()> {
        let store = self.writable_store(cluster).await?;
        let key = NamespacedName::of(object);
        if store.get_by_key(&key.to_string()).await.is_some() {
            anyhow::bail!("{} already exists in cluster {}", key, cluster);
        }
        store.insert(key.to_string(), object.clone()).await;
        self.notify(WatchNotification::Cluster {
            cluster: cluster.to_string(),
            key,
        })
        .await;
        Ok(())
    }

    async fn update(&self, cluster: &str, object: &K) -> anyhow::Result<()> {
        let store = self.writable_store(cluster).await?;
        let key = NamespacedName::of(object);
        if store.get_by_key(&key.to_string()).await.is_none() {
            anyhow::bail!("{} not found in cluster {}", key, cluster);
        }
        store.insert(key.to_string(), object.clone()).await;
        self.notify(WatchNotification::Cluster {
            cluster: cluster.to_string(),
            key,
        })
        .await;
        Ok(())
    }

    async fn delete(&self, cluster: &str, object: &K) -> anyhow::Result<()> {
        let store = self.writable_store(cluster).await?;
        let key = NamespacedName::of(object);
        if store.delete(&key.to_string()).await.is_none() {
            anyhow::bail!("{} not found in cluster {}", key, cluster);
        }
        self.notify(WatchNotification::Cluster {
            cluster: cluster.to_string(),
            key,
        })
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn writes_land_in_the_target_cluster_only() {
        let federation: InMemoryFederation<Secret> = InMemoryFederation::new();
        federation.add_cluster("c1").await;
        federation.add_cluster("c2").await;

        federation.add("c1", &secret("a")).await.unwrap();
        assert!(federation.add("c1", &secret("a")).await.is_err());
        assert!(federation.update("c2", &secret("a")).await.is_err());

        let store = federation.target_store();
        assert!(store.get_by_key("c1", "default/a").await.unwrap().is_some());
        assert!(store.get_by_key("c2", "default/a").await.unwrap().is_none());
        assert_eq!(store.get_from_all_clusters("default/a").await.unwrap().len(), 1);
        assert_eq!(store.list().await.unwrap().len(), 1);

        federation.delete("c1", &secret("a")).await.unwrap();
        assert!(store.list_from_cluster("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn readiness_and_failures() {
        let (tx, mut rx) = mpsc::channel(8);
        let federation: InMemoryFederation<Secret> = InMemoryFederation::new();
        federation.notify_to(tx).await;

        federation.add_cluster("c1").await;
        assert_eq!(
            rx.recv().await,
            Some(WatchNotification::ClusterAvailable("c1".to_string()))
        );
        assert_eq!(
            federation.get_ready_cluster("c1").await.unwrap(),
            Some(Cluster::new("c1"))
        );
        assert!(
            federation
                .target_store()
                .clusters_synced(&[Cluster::new("c1")])
                .await
        );
        assert!(
            !federation
                .target_store()
                .clusters_synced(&[Cluster::new("c2")])
                .await
        );

        federation.fail_writes("c1", true).await;
        assert!(federation.add("c1", &secret("a")).await.is_err());
        federation.fail_writes("c1", false).await;
        federation.add("c1", &secret("a")).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(WatchNotification::Cluster {
                cluster: "c1".to_string(),
                key: NamespacedName::new("default", "a"),
            })
        );

        federation.remove_cluster("c1").await;
        assert!(federation.get_ready_clusters().await.unwrap().is_empty());
    }
}
