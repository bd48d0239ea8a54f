//! Member clusters reached through the Kubernetes API.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::ResourceExt;
use kube_runtime::watcher::Event;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    Cluster, ClusterOperations, FederatedInformer, FederatedObject, FederatedReadOnlyStore,
    FederatedResource, WatchNotification,
};
use crate::config::ConfigError;
use crate::store::{MemoryStore, Store};
use crate::util::PrettyEvent;
use crate::NamespacedName;

/// The member clusters of a federation and the clients that reach them.
#[derive(Clone, Default)]
pub struct ClusterRegistry {
    clients: BTreeMap<String, kube::Client>,
}

impl ClusterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `client` as the way to reach cluster `name`.
    pub fn insert(&mut self, name: &str, client: kube::Client) {
        self.clients.insert(name.to_string(), client);
    }

    /// Builds a registry with one member per kubeconfig context. Each member
    /// is named after its context.
    pub async fn from_kubeconfig(
        kubeconfig: Option<&Path>,
        contexts: &[String],
    ) -> anyhow::Result<Self> {
        let file = match kubeconfig {
            Some(path) => Some(Kubeconfig::read_from(path).map_err(|e| {
                anyhow::anyhow!("Unable to read kubeconfig {}: {}", path.display(), e)
            })?),
            None => None,
        };

        let mut registry = ClusterRegistry::new();
        for context in contexts {
            let options = KubeConfigOptions {
                context: Some(context.clone()),
                ..Default::default()
            };
            let config = match &file {
                Some(file) => kube::Config::from_custom_kubeconfig(file.clone(), &options).await,
                None => kube::Config::from_kubeconfig(&options).await,
            }
            .map_err(|e| anyhow::anyhow!("Unable to load context {}: {}", context, e))?;
            registry.insert(context, kube::Client::try_from(config)?);
        }
        Ok(registry)
    }

    /// The client of cluster `name`.
    pub fn client(&self, name: &str) -> Option<&kube::Client> {
        self.clients.get(name)
    }

    /// Names of every member, ready or not.
    pub fn names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the registry has no members.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Watches every object of kind `K` through `api` into `store`, and sends a
/// notification for every changed key. Notifications are
/// [`WatchNotification::Local`] when `cluster` is `None`.
pub async fn launch_watcher<K: FederatedResource>(
    api: Api<K>,
    store: Arc<MemoryStore<K>>,
    cluster: Option<String>,
    tx: mpsc::Sender<WatchNotification>,
) {
    info!(?cluster, "Starting watcher.");
    let mut watcher = kube_runtime::watcher(api, ListParams::default()).boxed();
    loop {
        match watcher.try_next().await {
            Ok(Some(event)) => {
                debug!(
                    ?cluster,
                    event = ?PrettyEvent::from(&event),
                    "Handling event."
                );
                for key in apply_event(&store, event).await {
                    let notification = match &cluster {
                        Some(cluster) => WatchNotification::Cluster {
                            cluster: cluster.clone(),
                            key,
                        },
                        None => WatchNotification::Local(key),
                    };
                    if tx.send(notification).await.is_err() {
                        debug!(?cluster, "Notification receiver dropped.");
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(error) => warn!(?cluster, ?error, "Error streaming object events."),
        }
    }
}

/// Applies one watch event to `store` and returns the keys it changed.
pub async fn apply_event<K: kube::Resource + Clone + Send + Sync>(
    store: &MemoryStore<K>,
    event: Event<K>,
) -> Vec<NamespacedName> {
    match event {
        Event::Applied(object) => {
            let key = NamespacedName::of(&object);
            store.insert(key.to_string(), object).await;
            vec![key]
        }
        Event::Deleted(object) => {
            let key = NamespacedName::of(&object);
            store.delete(&key.to_string()).await;
            vec![key]
        }
        Event::Restarted(objects) => {
            let mut changed: Vec<NamespacedName> = store
                .list()
                .await
                .iter()
                .map(NamespacedName::of)
                .collect();
            let listing: Vec<(String, K)> = objects
                .into_iter()
                .map(|object| (NamespacedName::of(&object).to_string(), object))
                .collect();
            changed.extend(listing.iter().filter_map(|(key, _)| key.parse().ok()));
            changed.sort();
            changed.dedup();
            store.replace(listing).await;
            changed
        }
    }
}

/// Whether `check` answers successfully within `limit`.
async fn check_health<T, E: Debug>(
    cluster: &str,
    limit: Duration,
    check: impl Future<Output = Result<T, E>>,
) -> bool {
    match tokio::time::timeout(limit, check).await {
        Ok(Ok(_)) => true,
        Ok(Err(error)) => {
            warn!(%cluster, ?error, "Cluster health probe failed.");
            false
        }
        Err(_) => {
            warn!(%cluster, ?limit, "Cluster health probe timed out.");
            false
        }
    }
}

type ReadyStores<K> = Arc<RwLock<BTreeMap<String, Arc<MemoryStore<K>>>>>;

/// A [`FederatedInformer`] over the clusters of a [`ClusterRegistry`].
///
/// Each member is probed periodically. A member that answers becomes ready
/// and gets a watcher feeding its target cache; a member that stops
/// answering loses both.
pub struct KubeFederatedInformer<K> {
    registry: ClusterRegistry,
    ready: ReadyStores<K>,
    watchers: Mutex<HashMap<String, JoinHandle<()>>>,
    probed: AtomicUsize,
    probe_period: Duration,
    tx: mpsc::Sender<WatchNotification>,
}

impl<K: FederatedResource> KubeFederatedInformer<K> {
    /// Creates an informer that reports changes to `tx`. Each member is
    /// health checked every `probe_period`, and a check taking longer than
    /// that counts as a failure.
    pub fn new(
        registry: ClusterRegistry,
        probe_period: Duration,
        tx: mpsc::Sender<WatchNotification>,
    ) -> Result<Self, ConfigError> {
        if probe_period.is_zero() {
            return Err(ConfigError::Zero("cluster probe period"));
        }
        Ok(KubeFederatedInformer {
            registry,
            ready: Arc::new(RwLock::new(BTreeMap::new())),
            watchers: Mutex::new(HashMap::new()),
            probed: AtomicUsize::new(0),
            probe_period,
            tx,
        })
    }

    /// Starts probing every member until `stop` is cancelled.
    pub fn start(self: &Arc<Self>, stop: CancellationToken) -> Vec<JoinHandle<()>> {
        self.registry
            .names()
            .into_iter()
            .map(|name| {
                let informer = Arc::clone(self);
                let stop = stop.clone();
                tokio::spawn(async move { informer.probe(name, stop).await })
            })
            .collect()
    }

    async fn probe(&self, name: String, stop: CancellationToken) {
        let client = match self.registry.client(&name) {
            Some(client) => client.clone(),
            None => return,
        };
        let mut interval = tokio::time::interval(self.probe_period);
        let mut first = true;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {}
            }
            let healthy =
                check_health(&name, self.probe_period, client.apiserver_version()).await;
            self.set_ready(&name, &client, healthy).await;
            if first {
                first = false;
                self.probed.fetch_add(1, Ordering::SeqCst);
            }
        }
        if let Some(watcher) = self.watchers.lock().await.remove(&name) {
            watcher.abort();
        }
    }

    async fn set_ready(&self, name: &str, client: &kube::Client, healthy: bool) {
        let was_ready = self.ready.read().await.contains_key(name);
        if healthy && !was_ready {
            info!(cluster = %name, "Cluster became ready.");
            let store = Arc::new(MemoryStore::new());
            let watcher = tokio::spawn(launch_watcher(
                Api::<K>::all(client.clone()),
                Arc::clone(&store),
                Some(name.to_string()),
                self.tx.clone(),
            ));
            self.watchers.lock().await.insert(name.to_string(), watcher);
            self.ready.write().await.insert(name.to_string(), store);
            self.notify(WatchNotification::ClusterAvailable(name.to_string()))
                .await;
        } else if !healthy && was_ready {
            info!(cluster = %name, "Cluster became unavailable.");
            self.ready.write().await.remove(name);
            if let Some(watcher) = self.watchers.lock().await.remove(name) {
                watcher.abort();
            }
            self.notify(WatchNotification::ClusterUnavailable(name.to_string()))
                .await;
        }
    }

    async fn notify(&self, notification: WatchNotification) {
        if self.tx.send(notification).await.is_err() {
            debug!("Notification receiver dropped.");
        }
    }
}

#[async_trait::async_trait]
impl<K: FederatedResource> FederatedInformer<K> for KubeFederatedInformer<K> {
    async fn get_ready_clusters(&self) -> anyhow::Result<Vec<Cluster>> {
        Ok(self
            .ready
            .read()
            .await
            .keys()
            .map(|name| Cluster::new(name))
            .collect())
    }

    async fn get_ready_cluster(&self, name: &str) -> anyhow::Result<Option<Cluster>> {
        Ok(self
            .ready
            .read()
            .await
            .get(name)
            .map(|_| Cluster::new(name)))
    }

    async fn clusters_synced(&self) -> bool {
        self.probed.load(Ordering::SeqCst) >= self.registry.len()
    }

    fn target_store(&self) -> Arc<dyn FederatedReadOnlyStore<K>> {
        Arc::new(KubeFederatedStore {
            ready: Arc::clone(&self.ready),
        })
    }
}

struct KubeFederatedStore<K> {
    ready: ReadyStores<K>,
}

impl<K: FederatedResource> KubeFederatedStore<K> {
    async fn store(&self, cluster: &str) -> anyhow::Result<Arc<MemoryStore<K>>> {
        self.ready
            .read()
            .await
            .get(cluster)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("cluster {} is not ready", cluster))
    }
}

#[async_trait::async_trait]
impl<K: FederatedResource> FederatedReadOnlyStore<K> for KubeFederatedStore<K> {
    async fn list(&self) -> anyhow::Result<Vec<FederatedObject<K>>> {
        let ready = self.ready.read().await;
        let mut objects = Vec::new();
        for (cluster, store) in ready.iter() {
            objects.extend(store.list().await.into_iter().map(|object| FederatedObject {
                cluster: cluster.clone(),
                object,
            }));
        }
        Ok(objects)
    }

    async fn list_from_cluster(&self, cluster: &str) -> anyhow::Result<Vec<K>> {
        Ok(self.store(cluster).await?.list().await)
    }

    async fn get_by_key(&self, cluster: &str, key: &str) -> anyhow::Result<Option<K>> {
        Ok(self.store(cluster).await?.get_by_key(key).await)
    }

    async fn get_from_all_clusters(&self, key: &str) -> anyhow::Result<Vec<FederatedObject<K>>> {
        let ready = self.ready.read().await;
        let mut objects = Vec::new();
        for (cluster, store) in ready.iter() {
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
        let ready = self.ready.read().await;
        clusters.iter().all(|cluster| {
            ready
                .get(&cluster.name)
                .map_or(false, |store| store.has_synced())
        })
    }
}

/// [`ClusterOperations`] through each member's API server.
pub struct KubeClusterOperations {
    registry: ClusterRegistry,
}

impl KubeClusterOperations {
    /// Writes to the members of `registry`.
    pub fn new(registry: ClusterRegistry) -> Self {
        KubeClusterOperations { registry }
    }

    fn api<K: FederatedResource>(&self, cluster: &str, object: &K) -> anyhow::Result<Api<K>> {
        let client = self
            .registry
            .client(cluster)
            .ok_or_else(|| anyhow::anyhow!("unknown cluster {}", cluster))?
            .clone();
        Ok(match object.namespace() {
            Some(namespace) => Api::namespaced(client, &namespace),
            None => Api::all(client),
        })
    }
}

#[async_trait::async_trait]
impl<K: FederatedResource> ClusterOperations<K> for KubeClusterOperations {
    async fn add(&self, cluster: &str, object: &K) -> anyhow::Result<()> {
        self.api(cluster, object)?
            .create(&PostParams::default(), object)
            .await?;
        Ok(())
    }

    async fn update(&self, cluster: &str, object: &K) -> anyhow::Result<()> {
        self.api(cluster, object)?
            .replace(&object.name(), &PostParams::default(), object)
            .await?;
        Ok(())
    }

    async fn delete(&self, cluster: &str, object: &K) -> anyhow::Result<()> {
        self.api(cluster, object)?
            .delete(&object.name(), &DeleteParams::default())
            .await?;
        Ok(())
    }
}
