//! Eventually consistent reconciliation of Kubernetes objects across a
//! federation of member clusters.
//!
//! The building blocks are:
//!
//! * a [`DelayingDeliverer`](deliverer::DelayingDeliverer), a keyed timer
//!   queue that collapses repeated schedules of the same key,
//! * per-key exponential [`backoff`],
//! * [`federated`] informers and stores giving a cached view of one kind of
//!   object in every ready member cluster,
//! * a [`FederatedUpdater`](updater::FederatedUpdater) applying per-cluster
//!   writes concurrently with isolated failures.
//!
//! [`SecretController`] puts them together for Secrets.
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use federation::config::Config;
//! use federation::event::MemoryEventRecorder;
//! use federation::federated::InMemoryFederation;
//! use federation::store::MemoryStore;
//! use federation::updater::ConcurrentUpdater;
//! use federation::SecretController;
//! use k8s_openapi::api::core::v1::Secret;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let local = Arc::new(MemoryStore::<Secret>::new());
//! let federation = InMemoryFederation::<Secret>::new();
//! let (tx, rx) = tokio::sync::mpsc::channel(64);
//! federation.notify_to(tx).await;
//!
//! let controller = Arc::new(SecretController::new(
//!     Config::default(),
//!     local,
//!     Arc::new(federation.clone()),
//!     Arc::new(ConcurrentUpdater::new(Arc::new(federation))),
//!     Arc::new(MemoryEventRecorder::new()),
//! ));
//! controller.run(rx, CancellationToken::new()).await
//! # }
//! ```

#![deny(missing_docs)]

pub mod backoff;
pub mod config;
pub mod deliverer;
pub mod event;
pub mod federated;
pub mod object;
pub mod secret;
pub mod store;
pub mod updater;
pub mod util;

pub use object::NamespacedName;
pub use secret::SecretController;
