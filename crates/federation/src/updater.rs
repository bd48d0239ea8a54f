//! Applying a batch of per-cluster writes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::federated::ClusterOperations;

/// Kind of write applied to one member cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationType {
    /// Create the object.
    Add,
    /// Replace the object.
    Update,
    /// Delete the object.
    Delete,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationType::Add => "add",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        })
    }
}

/// One write to one member cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct FederatedOperation<K> {
    /// What to do.
    pub type_: OperationType,
    /// Member cluster to write to.
    pub cluster: String,
    /// The object to write.
    pub object: K,
    /// `namespace/name` of the object, for logs.
    pub key: String,
}

/// Why a batch of writes did not fully succeed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UpdateError {
    /// Some operations failed; the others were applied.
    #[error("{failed} of {total} operations failed")]
    Failed {
        /// Number of failed operations.
        failed: usize,
        /// Size of the batch.
        total: usize,
    },
    /// The batch did not finish in time.
    #[error("operations did not complete within {0:?}")]
    Timeout(Duration),
}

/// Callback invoked for every failed operation.
pub type ErrorCallback<'a, K> = &'a (dyn Fn(&FederatedOperation<K>, &anyhow::Error) + Send + Sync);

/// Applies a batch of operations across member clusters.
#[async_trait::async_trait]
pub trait FederatedUpdater<K>: Send + Sync {
    /// Applies every operation. A failure in one cluster does not stop the
    /// others; each failure is reported to `on_error` before the batch
    /// returns.
    async fn update(
        &self,
        operations: Vec<FederatedOperation<K>>,
        timeout: Duration,
        on_error: ErrorCallback<'_, K>,
    ) -> Result<(), UpdateError>;
}

/// A [`FederatedUpdater`] that runs every operation concurrently.
pub struct ConcurrentUpdater<K> {
    operations: Arc<dyn ClusterOperations<K>>,
}

impl<K> ConcurrentUpdater<K> {
    /// Writes through `operations`.
    pub fn new(operations: Arc<dyn ClusterOperations<K>>) -> Self {
        ConcurrentUpdater { operations }
    }
}

#[async_trait::async_trait]
impl<K: Send + Sync + 'static> FederatedUpdater<K> for ConcurrentUpdater<K> {
    async fn update(
        &self,
        operations: Vec<FederatedOperation<K>>,
        timeout: Duration,
        on_error: ErrorCallback<'_, K>,
    ) -> Result<(), UpdateError> {
        let total = operations.len();
        let writes = operations.iter().map(|op| async move {
            let result = match op.type_ {
                OperationType::Add => self.operations.add(&op.cluster, &op.object).await,
                OperationType::Update => self.operations.update(&op.cluster, &op.object).await,
                OperationType::Delete => self.operations.delete(&op.cluster, &op.object).await,
            };
            match result {
                Ok(()) => {
                    debug!(key = %op.key, cluster = %op.cluster, operation = %op.type_, "Applied operation.");
                    true
                }
                Err(error) => {
                    warn!(key = %op.key, cluster = %op.cluster, operation = %op.type_, ?error, "Operation failed.");
                    on_error(op, &error);
                    false
                }
            }
        });

        let results = tokio::time::timeout(timeout, join_all(writes))
            .await
            .map_err(|_| UpdateError::Timeout(timeout))?;
        let failed = results.into_iter().filter(|ok| !ok).count();
        if failed > 0 {
            return Err(UpdateError::Failed { failed, total });
        }
        Ok(())
    }
}
