//! Keeps Secrets of the host cluster in sync across every ready member.
//!
//! Each change to a desired Secret, or to its copy in a member cluster,
//! schedules a reconcile of that Secret's key. A reconcile compares the
//! desired Secret with every member's copy and creates or replaces the copies
//! that differ. Failing keys are retried with a per-key exponential backoff;
//! healthy keys are reviewed again after a while in case a change was missed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::KeyedBackoff;
use crate::config::Config;
use crate::deliverer::{DelayedItem, DelayingDeliverer};
use crate::event::{object_reference, EventRecorder, EventType};
use crate::federated::{FederatedInformer, WatchNotification};
use crate::store::Store;
use crate::updater::{FederatedOperation, FederatedUpdater, OperationType};
use crate::util::{copy_object_meta, object_meta_equivalent};
use crate::NamespacedName;

/// Key under which whole-set reconciles are scheduled.
pub const ALL_CLUSTERS_KEY: &str = "ALL_CLUSTERS";

const DEFAULT_SECRET_TYPE: &str = "Opaque";

/// Where a key stands in its reconcile cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileState {
    /// Waiting for the caches to load.
    Unsynced,
    /// A reconcile is running.
    Reconciling,
    /// Every ready member holds an equivalent copy, or the writes to make it
    /// so all succeeded.
    Settled,
    /// The last reconcile failed and a retry is scheduled.
    Backoff,
}

/// Result of one reconcile of one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No desired Secret exists; nothing to do.
    NotFederated,
    /// The caches are still loading; retried later.
    Unsynced,
    /// Every ready member already holds an equivalent copy.
    Settled,
    /// This many writes were applied; a review is scheduled.
    Updated {
        /// Number of applied operations.
        operations: usize,
    },
    /// Reading or writing failed; a retry is scheduled.
    Failed,
}

/// The federated Secret controller.
pub struct SecretController {
    config: Config,
    local: Arc<dyn Store<Secret>>,
    informer: Arc<dyn FederatedInformer<Secret>>,
    updater: Arc<dyn FederatedUpdater<Secret>>,
    recorder: Arc<dyn EventRecorder>,
    secret_deliverer: Arc<DelayingDeliverer<NamespacedName>>,
    cluster_deliverer: Arc<DelayingDeliverer<()>>,
    backoff: Mutex<KeyedBackoff>,
    states: Mutex<HashMap<NamespacedName, ReconcileState>>,
}

impl SecretController {
    /// Creates a controller reading desired Secrets from `local` and member
    /// copies through `informer`.
    pub fn new(
        config: Config,
        local: Arc<dyn Store<Secret>>,
        informer: Arc<dyn FederatedInformer<Secret>>,
        updater: Arc<dyn FederatedUpdater<Secret>>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        let backoff = KeyedBackoff::new(config.backoff_initial, config.backoff_max);
        SecretController {
            config,
            local,
            informer,
            updater,
            recorder,
            secret_deliverer: Arc::new(DelayingDeliverer::new()),
            cluster_deliverer: Arc::new(DelayingDeliverer::new()),
            backoff: Mutex::new(backoff),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Schedules a reconcile of `key` after `delay`. A failed key waits an
    /// extra backoff delay. The backoff itself is only reset by a successful
    /// reconcile.
    pub fn deliver_secret(&self, key: &NamespacedName, delay: Duration, failed: bool) {
        let id = key.to_string();
        let delay = if failed {
            delay + self.lock_backoff().next(&id, Instant::now())
        } else {
            delay
        };
        debug!(%key, ?delay, failed, "Scheduling secret reconcile.");
        self.secret_deliverer.deliver_after(id, key.clone(), delay);
    }

    /// Whether the local cache, the cluster list and the cache of every ready
    /// member are loaded.
    pub async fn is_synced(&self) -> bool {
        if !self.informer.clusters_synced().await || !self.local.has_synced() {
            return false;
        }
        match self.informer.get_ready_clusters().await {
            Ok(clusters) => {
                self.informer
                    .target_store()
                    .clusters_synced(&clusters)
                    .await
            }
            Err(error) => {
                warn!(?error, "Unable to list ready clusters.");
                false
            }
        }
    }

    /// Brings every ready member's copy of `key` in line with the desired
    /// Secret.
    #[tracing::instrument(level = "debug", skip(self, key), fields(key = %key))]
    pub async fn reconcile_secret(&self, key: &NamespacedName) -> ReconcileOutcome {
        if !self.is_synced().await {
            debug!("Caches not synced yet.");
            self.deliver_secret(key, self.config.cluster_available_delay, false);
            self.set_state(key, ReconcileState::Unsynced);
            return ReconcileOutcome::Unsynced;
        }
        self.set_state(key, ReconcileState::Reconciling);

        let desired = match self.local.get_by_key(&key.to_string()).await {
            Some(secret) => secret,
            None => {
                debug!("Secret is not federated.");
                self.lock_states().remove(key);
                return ReconcileOutcome::NotFederated;
            }
        };

        let operations = match self.plan(key, &desired).await {
            Ok(operations) => operations,
            Err(error) => {
                warn!(?error, "Unable to read member clusters.");
                return self.retry(key);
            }
        };
        if operations.is_empty() {
            self.lock_backoff().reset(&key.to_string());
            self.set_state(key, ReconcileState::Settled);
            return ReconcileOutcome::Settled;
        }

        let count = operations.len();
        let reference = object_reference(&desired);
        let recorder = &self.recorder;
        let on_error = |op: &FederatedOperation<Secret>, error: &anyhow::Error| {
            recorder.event(
                &reference,
                EventType::Warning,
                "UpdateInClusterFailed",
                &format!("Update secret in cluster {} failed: {}", op.cluster, error),
            );
        };
        match self
            .updater
            .update(operations, self.config.update_timeout, &on_error)
            .await
        {
            Ok(()) => {
                info!(operations = count, "Secret updated in member clusters.");
                self.lock_backoff().reset(&key.to_string());
                self.deliver_secret(key, self.config.secret_review_delay, false);
                self.set_state(key, ReconcileState::Settled);
                ReconcileOutcome::Updated { operations: count }
            }
            Err(error) => {
                warn!(?error, "Failed to execute updates.");
                self.retry(key)
            }
        }
    }

    /// Schedules a reconcile of every desired Secret, or retries the whole
    /// set later while caches are loading.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn reconcile_secrets_on_cluster_change(&self) {
        if !self.is_synced().await {
            self.cluster_deliverer.deliver_after(
                ALL_CLUSTERS_KEY,
                (),
                self.config.cluster_available_delay,
            );
            return;
        }
        for secret in self.local.list().await {
            self.deliver_secret(&NamespacedName::of(&secret), self.config.small_delay, false);
        }
    }

    /// Reacts to one watch notification.
    pub fn handle_notification(&self, notification: WatchNotification) {
        match notification {
            WatchNotification::Local(key) | WatchNotification::Cluster { key, .. } => {
                self.deliver_on_change(&key)
            }
            WatchNotification::ClusterAvailable(cluster) => {
                info!(%cluster, "Cluster available; scheduling full reconcile.");
                self.cluster_deliverer.deliver_after(
                    ALL_CLUSTERS_KEY,
                    (),
                    self.config.cluster_available_delay,
                );
            }
            WatchNotification::ClusterUnavailable(cluster) => {
                info!(%cluster, "Cluster unavailable.");
            }
        }
    }

    /// Runs the controller until `stop` is cancelled or `notifications`
    /// closes. Fails right away when the configured timings are invalid.
    pub async fn run(
        self: Arc<Self>,
        mut notifications: mpsc::Receiver<WatchNotification>,
        stop: CancellationToken,
    ) -> anyhow::Result<()> {
        self.config.validate()?;
        let controller = Arc::clone(&self);
        let secrets = self
            .secret_deliverer
            .start_with_handler(move |item: DelayedItem<NamespacedName>| {
                let controller = Arc::clone(&controller);
                async move {
                    controller.reconcile_secret(&item.value).await;
                }
            });
        let controller = Arc::clone(&self);
        let clusters = self.cluster_deliverer.start_with_handler(move |_| {
            let controller = Arc::clone(&controller);
            async move { controller.reconcile_secrets_on_cluster_change().await }
        });

        info!("Secret controller started.");
        let mut gc = tokio::time::interval(self.config.backoff_gc_period);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = gc.tick() => self.lock_backoff().gc(Instant::now()),
                notification = notifications.recv() => match notification {
                    Some(notification) => self.handle_notification(notification),
                    None => {
                        info!("Notification channel closed.");
                        break;
                    }
                },
            }
        }

        self.secret_deliverer.stop();
        self.cluster_deliverer.stop();
        secrets.await?;
        clusters.await?;
        info!("Secret controller stopped.");
        Ok(())
    }

    /// Where `key` stands, if it has been reconciled.
    pub fn state(&self, key: &NamespacedName) -> Option<ReconcileState> {
        self.lock_states().get(key).copied()
    }

    /// When the next reconcile of `key` is due.
    pub fn pending_delivery(&self, key: &NamespacedName) -> Option<Instant> {
        self.secret_deliverer.pending_delivery(&key.to_string())
    }

    /// When the next whole-set reconcile is due.
    pub fn pending_cluster_reconcile(&self) -> Option<Instant> {
        self.cluster_deliverer.pending_delivery(ALL_CLUSTERS_KEY)
    }

    /// The current backoff delay of `key`.
    pub fn backoff_delay(&self, key: &NamespacedName) -> Duration {
        self.lock_backoff().get(&key.to_string())
    }

    async fn plan(
        &self,
        key: &NamespacedName,
        desired: &Secret,
    ) -> anyhow::Result<Vec<FederatedOperation<Secret>>> {
        let clusters = self.informer.get_ready_clusters().await?;
        let target_store = self.informer.target_store();
        let reference = object_reference(desired);
        let wanted = desired_secret(desired);
        let id = key.to_string();

        let mut operations = Vec::new();
        for cluster in clusters {
            let type_ = match target_store.get_by_key(&cluster.name, &id).await? {
                None => {
                    self.recorder.event(
                        &reference,
                        EventType::Normal,
                        "CreateInCluster",
                        &format!("Creating secret in cluster {}", cluster.name),
                    );
                    OperationType::Add
                }
                Some(current) if !secret_equivalent(&wanted, &current) => {
                    self.recorder.event(
                        &reference,
                        EventType::Normal,
                        "UpdateInCluster",
                        &format!("Updating secret in cluster {}", cluster.name),
                    );
                    OperationType::Update
                }
                Some(_) => continue,
            };
            operations.push(FederatedOperation {
                type_,
                cluster: cluster.name,
                object: wanted.clone(),
                key: id.clone(),
            });
        }
        Ok(operations)
    }

    /// Reconciles a changed key right away, unless it is backing off. A
    /// retry that is already scheduled is kept so the echo of our own writes
    /// cannot cut a backoff short.
    fn deliver_on_change(&self, key: &NamespacedName) {
        let id = key.to_string();
        if !self.lock_backoff().get(&id).is_zero() {
            if let Some(due) = self.secret_deliverer.pending_delivery(&id) {
                debug!(%key, ?due, "Secret is backing off; keeping its retry.");
                return;
            }
        }
        self.deliver_secret(key, Duration::ZERO, false);
    }

    fn retry(&self, key: &NamespacedName) -> ReconcileOutcome {
        self.deliver_secret(key, Duration::ZERO, true);
        self.set_state(key, ReconcileState::Backoff);
        ReconcileOutcome::Failed
    }

    fn set_state(&self, key: &NamespacedName, state: ReconcileState) {
        self.lock_states().insert(key.clone(), state);
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<NamespacedName, ReconcileState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_backoff(&self) -> MutexGuard<'_, KeyedBackoff> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The copy of `secret` written to member clusters: identity, labels,
/// annotations, data and type. Server-owned fields are left out.
pub fn desired_secret(secret: &Secret) -> Secret {
    Secret {
        metadata: copy_object_meta(&secret.metadata),
        data: secret.data.clone(),
        type_: secret.type_.clone(),
        ..Default::default()
    }
}

/// Whether two Secrets agree on everything the controller manages. Missing
/// maps equal empty ones and a missing type is `Opaque`.
pub fn secret_equivalent(a: &Secret, b: &Secret) -> bool {
    let data = |s: &Secret| s.data.as_ref().filter(|d| !d.is_empty()).cloned();
    let type_ = |s: &Secret| {
        s.type_
            .clone()
            .unwrap_or_else(|| DEFAULT_SECRET_TYPE.to_string())
    };
    object_meta_equivalent(&a.metadata, &b.metadata)
        && data(a).unwrap_or_else(BTreeMap::new) == data(b).unwrap_or_else(BTreeMap::new)
        && type_(a) == type_(b)
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;

    fn secret(value: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("db".to_string()),
                namespace: Some("prod".to_string()),
                resource_version: Some("7".to_string()),
                uid: Some("1234".to_string()),
                ..Default::default()
            },
            data: Some(
                vec![("password".to_string(), ByteString(value.as_bytes().to_vec()))]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn desired_copy_drops_server_fields() {
        let copy = desired_secret(&secret("hunter2"));
        assert_eq!(copy.metadata.resource_version, None);
        assert_eq!(copy.metadata.uid, None);
        assert_eq!(copy.metadata.name.as_deref(), Some("db"));
        assert!(secret_equivalent(&copy, &secret("hunter2")));
    }

    #[test]
    fn equivalence_compares_data_and_type() {
        assert!(!secret_equivalent(&secret("a"), &secret("b")));

        let mut typed = secret("a");
        typed.type_ = Some("Opaque".to_string());
        assert!(secret_equivalent(&typed, &secret("a")));
        typed.type_ = Some("kubernetes.io/tls".to_string());
        assert!(!secret_equivalent(&typed, &secret("a")));

        let mut empty = secret("a");
        empty.data = Some(BTreeMap::new());
        let mut missing = secret("a");
        missing.data = None;
        assert!(secret_equivalent(&empty, &missing));
    }
}
