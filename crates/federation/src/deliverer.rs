//! A keyed timer queue.
//!
//! Each key has at most one pending delivery. Scheduling a key that is
//! already pending replaces the old delivery, so a burst of changes to the
//! same object collapses into a single reconcile.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// An item handed to the delivery handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelayedItem<T> {
    /// The key the item was scheduled under.
    pub key: String,
    /// The scheduled payload.
    pub value: T,
    /// When the item was due.
    pub deliver_at: Instant,
}

struct Pending<T> {
    value: T,
    slot: (Instant, u64),
}

struct Schedule<T> {
    by_time: BTreeMap<(Instant, u64), String>,
    pending: HashMap<String, Pending<T>>,
    sequence: u64,
}

impl<T> Schedule<T> {
    fn insert(&mut self, key: String, value: T, at: Instant) {
        if let Some(old) = self.pending.remove(&key) {
            self.by_time.remove(&old.slot);
        }
        self.sequence += 1;
        let slot = (at, self.sequence);
        self.by_time.insert(slot, key.clone());
        self.pending.insert(key, Pending { value, slot });
    }

    fn pop_due(&mut self, now: Instant) -> Option<DelayedItem<T>> {
        let slot = *self.by_time.keys().next()?;
        if slot.0 > now {
            return None;
        }
        let key = self.by_time.remove(&slot)?;
        let pending = self.pending.remove(&key)?;
        Some(DelayedItem {
            key,
            value: pending.value,
            deliver_at: slot.0,
        })
    }

    fn next_due(&self) -> Option<Instant> {
        self.by_time.keys().next().map(|(at, _)| *at)
    }
}

/// Delivers keyed items to a handler once they are due.
pub struct DelayingDeliverer<T> {
    schedule: Mutex<Schedule<T>>,
    changed: Notify,
    stop: CancellationToken,
}

impl<T: Send + 'static> Default for DelayingDeliverer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> DelayingDeliverer<T> {
    /// Creates a deliverer with its own stop signal.
    pub fn new() -> Self {
        Self::with_stop(CancellationToken::new())
    }

    /// Creates a deliverer that stops when `stop` is cancelled.
    pub fn with_stop(stop: CancellationToken) -> Self {
        DelayingDeliverer {
            schedule: Mutex::new(Schedule {
                by_time: BTreeMap::new(),
                pending: HashMap::new(),
                sequence: 0,
            }),
            changed: Notify::new(),
            stop,
        }
    }

    /// Schedules `value` under `key` for delivery at `at`, replacing any
    /// delivery still pending for `key`.
    pub fn deliver_at(&self, key: impl Into<String>, value: T, at: Instant) {
        let key = key.into();
        trace!(%key, "scheduling delivery");
        self.lock().insert(key, value, at);
        self.changed.notify_one();
    }

    /// Schedules `value` under `key` for delivery after `delay`.
    pub fn deliver_after(&self, key: impl Into<String>, value: T, delay: Duration) {
        self.deliver_at(key, value, Instant::now() + delay);
    }

    /// When the pending delivery for `key` is due, if there is one.
    pub fn pending_delivery(&self, key: &str) -> Option<Instant> {
        self.lock().pending.get(key).map(|p| p.slot.0)
    }

    /// Number of pending deliveries.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Halts dispatch. Pending items are never delivered.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Starts dispatching due items to `handler`, one at a time and in due
    /// order. Returns the dispatch task, which ends once the deliverer is
    /// stopped.
    pub fn start_with_handler<F, Fut>(self: &Arc<Self>, handler: F) -> JoinHandle<()>
    where
        F: Fn(DelayedItem<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let deliverer = Arc::clone(self);
        tokio::spawn(async move { deliverer.dispatch(handler).await })
    }

    async fn dispatch<F, Fut>(&self, handler: F)
    where
        F: Fn(DelayedItem<T>) -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            if self.stop.is_cancelled() {
                break;
            }
            let due = self.lock().pop_due(Instant::now());
            if let Some(item) = due {
                debug!(key = %item.key, "delivering item");
                handler(item).await;
                continue;
            }

            let next_due = self.lock().next_due();
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = self.changed.notified() => {}
                _ = sleep_until(next_due) => {}
            }
        }
        debug!("deliverer stopped");
    }

    fn lock(&self) -> MutexGuard<'_, Schedule<T>> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
