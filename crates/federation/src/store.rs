//! Local caches of Kubernetes objects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

/// A read-only, eventually consistent view of one kind of object, keyed by
/// `namespace/name`.
#[async_trait::async_trait]
pub trait Store<K>: Send + Sync {
    /// Every cached object.
    async fn list(&self) -> Vec<K>;
    /// The cached object with the given key.
    async fn get_by_key(&self, key: &str) -> Option<K>;
    /// Whether the initial listing has been loaded.
    fn has_synced(&self) -> bool;
}

/// A [`Store`] held in memory and fed by a watcher.
///
/// ```
/// # use federation::store::{MemoryStore, Store};
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.insert("default/a", 1).await;
/// assert!(!store.has_synced());
///
/// store.replace(vec![("default/b".to_string(), 2)]).await;
/// assert!(store.has_synced());
/// assert_eq!(store.get_by_key("default/a").await, None);
/// assert_eq!(store.get_by_key("default/b").await, Some(2));
/// # }
/// ```
pub struct MemoryStore<K> {
    objects: RwLock<HashMap<String, K>>,
    synced: AtomicBool,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        MemoryStore {
            objects: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
        }
    }
}

impl<K> MemoryStore<K> {
    /// Initialize an empty, unsynced store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an object.
    pub async fn insert(&self, key: impl Into<String>, object: K) {
        self.objects.write().await.insert(key.into(), object);
    }

    /// Delete a cached object.
    pub async fn delete(&self, key: &str) -> Option<K> {
        self.objects.write().await.remove(key)
    }

    /// Replace the whole content with a fresh listing and mark the store
    /// synced.
    pub async fn replace(&self, objects: Vec<(String, K)>) {
        let mut cached = self.objects.write().await;
        cached.clear();
        cached.extend(objects);
        self.synced.store(true, Ordering::SeqCst);
    }

    /// Mark the store synced without changing its content.
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::SeqCst);
    }

    /// Number of cached objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl<K: Clone + Send + Sync> Store<K> for MemoryStore<K> {
    async fn list(&self) -> Vec<K> {
        self.objects.read().await.values().cloned().collect()
    }

    async fn get_by_key(&self, key: &str) -> Option<K> {
        self.objects.read().await.get(key).cloned()
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}
