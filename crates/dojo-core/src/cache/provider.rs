use std::sync::Arc;

use parking_lot::Mutex;

use super::bounded::{BoundedCache, CacheError};

/// The minimal contract a data-fetching layer needs from a pluggable cache.
///
/// Methods take `&self` so one provider can be shared between the fetch
/// layer and whoever invalidates it (e.g. logout).
pub trait CacheProvider<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn set(&self, key: &str, value: V);
    fn delete(&self, key: &str) -> bool;
    /// Snapshot of the keys, least to most recently used, taken at call
    /// time. Later writes are not reflected in the returned `Vec`.
    fn keys(&self) -> Vec<String>;
}

/// A `BoundedCache` behind a single mutex, cloneable across tasks.
///
/// Every operation is short (hash lookup plus a few index swaps), so one
/// lock around the map and the recency list is enough.
pub struct SharedCache<V> {
    inner: Arc<Mutex<BoundedCache<V>>>,
}

impl<V> Clone for SharedCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for SharedCache<V> {
    fn default() -> Self {
        Self::from_cache(BoundedCache::default())
    }
}

impl<V> SharedCache<V> {
    pub fn new(max_size: usize) -> Result<Self, CacheError> {
        Ok(Self::from_cache(BoundedCache::new(max_size)?))
    }

    pub fn from_cache(cache: BoundedCache<V>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.inner.lock().max_size()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl<V: Clone + Send> CacheProvider<V> for SharedCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: V) {
        if let Some((evicted, _)) = self.inner.lock().set(key, value) {
            tracing::trace!(key = %evicted, "Evicted least recently used cache entry");
        }
    }

    fn delete(&self, key: &str) -> bool {
        self.inner.lock().delete(key)
    }

    fn keys(&self) -> Vec<String> {
        self.inner.lock().keys().map(str::to_string).collect()
    }
}
