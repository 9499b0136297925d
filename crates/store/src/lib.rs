//! Lumen store: keyed in-memory resource maps and the topology cell used by
//! the in-process client.

#![forbid(unsafe_code)]

use std::hash::Hash;
use std::sync::Arc;

use arc_swap::ArcSwap;
use lumen_core::{ClientResult, Cluster};
use rustc_hash::FxHashMap;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::debug;

/// Identity of a resource: its name within an optional scope (repository or
/// view). Global kinds use an empty scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopedName {
    pub scope: String,
    pub name: String,
}

impl ScopedName {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self { scope: scope.into(), name: name.into() }
    }

    pub fn global(name: impl Into<String>) -> Self { Self::new(String::new(), name) }
}

impl std::fmt::Display for ScopedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scope.is_empty() { f.write_str(&self.name) } else { write!(f, "{}/{}", self.scope, self.name) }
    }
}

/// One resource kind, keyed by identity. Writes replace whole values.
pub struct KeyedStore<K, V> {
    map: RwLock<FxHashMap<K, V>>,
}

impl<K, V> Default for KeyedStore<K, V> {
    fn default() -> Self { Self { map: RwLock::new(FxHashMap::default()) } }
}

impl<K, V> KeyedStore<K, V>
where
    K: Eq + Hash + Clone + Ord,
    V: Clone,
{
    pub fn new() -> Self { Self::default() }

    pub async fn get(&self, key: &K) -> Option<V> { self.map.read().await.get(key).cloned() }

    /// Insert or fully replace the value at `key`. `build` sees the previous
    /// value so cluster-generated fields can be carried over; nothing is
    /// written when it fails.
    pub async fn try_put<E, F>(&self, key: K, build: F) -> Result<V, E>
    where
        F: FnOnce(Option<&V>) -> Result<V, E>,
    {
        let mut map = self.map.write().await;
        let next = build(map.get(&key))?;
        map.insert(key, next.clone());
        Ok(next)
    }

    pub async fn put_with<F>(&self, key: K, build: F) -> V
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let mut map = self.map.write().await;
        let next = build(map.get(&key));
        map.insert(key, next.clone());
        next
    }

    /// Remove `key`. Removing an absent key is not an error.
    pub async fn remove(&self, key: &K) -> Option<V> { self.map.write().await.remove(key) }

    pub async fn len(&self) -> usize { self.map.read().await.len() }

    pub async fn is_empty(&self) -> bool { self.map.read().await.is_empty() }

    /// Keys in sorted order.
    pub async fn keys(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.map.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Current topology with lock-free reads and whole-value swaps. Writers are
/// serialized so every update sees the result of the previous one.
pub struct TopologyCell {
    snap: ArcSwap<Cluster>,
    writer: Mutex<()>,
    epoch_tx: watch::Sender<u64>,
    epoch_rx: watch::Receiver<u64>,
}

impl TopologyCell {
    pub fn new(cluster: Cluster) -> Self {
        let (epoch_tx, epoch_rx) = watch::channel(0u64);
        Self { snap: ArcSwap::from_pointee(cluster), writer: Mutex::new(()), epoch_tx, epoch_rx }
    }

    pub fn current(&self) -> Arc<Cluster> { self.snap.load_full() }

    pub fn epoch(&self) -> u64 { *self.epoch_rx.borrow() }

    /// Receiver bumped after every successful swap.
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    /// Compute the next topology from the current one and swap it in. When
    /// `f` fails the current topology stays in effect.
    pub async fn update<F>(&self, f: F) -> ClientResult<Arc<Cluster>>
    where
        F: FnOnce(&Cluster) -> ClientResult<Cluster>,
    {
        let _guard = self.writer.lock().await;
        let cur = self.snap.load_full();
        let next = Arc::new(f(&cur)?);
        self.snap.store(Arc::clone(&next));
        let epoch = self.epoch().saturating_add(1);
        let _ = self.epoch_tx.send(epoch);
        debug!(epoch, nodes = next.nodes.len(), "topology swapped");
        Ok(next)
    }
}
