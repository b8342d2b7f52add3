//! Thread-safe, count-bounded LRU of decoded thumbnails
//!
//! Every entry records the access tick of its last `get`/`put`. When the cache
//! grows past its capacity the entry with the oldest tick is evicted until the
//! count is back at capacity. All operations go through one mutex, so workers
//! publishing results and the UI reading them are serialized.

use parking_lot::Mutex;
use std::fmt;
use std::hash::Hash;

/// Bounded LRU mapping keys to cheaply clonable values
pub struct LruCache<K, V> {
    inner: Mutex<LruCacheInner<K, V>>,
}

/// A cached value and the tick it was last touched at
#[derive(Debug, Clone)]
pub struct LruEntry<V> {
    pub value: V,
    pub last_access: u64,
}

struct LruCacheInner<K, V> {
    // Unbounded internally; the capacity here is enforced by `evict_over_capacity`
    // so that a capacity of zero is representable.
    data: lru::LruCache<K, LruEntry<V>>,
    capacity: usize,
    access_counter: u64,
}

impl<K: Clone + Hash + Eq, V: Clone> LruCache<K, V> {
    /// Create a new cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCacheInner {
                data: lru::LruCache::unbounded(),
                capacity,
                access_counter: 0,
            }),
        }
    }

    /// Get a value, marking it most recently used
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().get(key)
    }

    /// Whether `key` is cached, without touching its access time
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().data.contains(key)
    }

    /// Access tick of `key`, without touching it
    pub fn last_access<Q>(&self, key: &Q) -> Option<u64>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().data.peek(key).map(|e| e.last_access)
    }

    /// Insert or replace a value, evicting the least recently used entries if
    /// the cache is now over capacity. Returns the evicted keys.
    pub fn put(&self, key: K, value: V) -> Vec<K> {
        self.inner.lock().put(key, value)
    }

    /// Remove a single entry
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().data.pop(key).map(|e| e.value)
    }

    /// Remove several entries under one lock; returns how many were present
    pub fn remove_all<'a, Q, I>(&self, keys: I) -> usize
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'a,
        I: IntoIterator<Item = &'a Q>,
    {
        let mut inner = self.inner.lock();
        keys.into_iter()
            .filter(|key| inner.data.pop(*key).is_some())
            .count()
    }

    /// Change the capacity, evicting immediately if it shrank below the current size
    pub fn set_capacity(&self, capacity: usize) -> Vec<K> {
        let mut inner = self.inner.lock();
        inner.capacity = capacity;
        inner.evict_over_capacity()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Get the number of items in the cache
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently cached, least recently used first
    pub fn keys(&self) -> Vec<K> {
        self.inner
            .lock()
            .data
            .iter()
            .rev()
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Clear all items from the cache
    pub fn clear(&self) {
        self.inner.lock().data.clear();
    }
}

impl<K: Clone + Hash + Eq, V: Clone> LruCacheInner<K, V> {
    fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.access_counter += 1;
        let tick = self.access_counter;
        self.data.get_mut(key).map(|entry| {
            entry.last_access = tick;
            entry.value.clone()
        })
    }

    fn put(&mut self, key: K, value: V) -> Vec<K> {
        self.access_counter += 1;
        self.data.put(
            key,
            LruEntry {
                value,
                last_access: self.access_counter,
            },
        );
        self.evict_over_capacity()
    }

    fn evict_over_capacity(&mut self) -> Vec<K> {
        let mut evicted = Vec::new();
        while self.data.len() > self.capacity {
            // Recency order in `data` matches `last_access` order
            match self.data.pop_lru() {
                Some((key, _)) => evicted.push(key),
                None => break,
            }
        }
        evicted
    }
}

impl<K, V> fmt::Debug for LruCache<K, V>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LruCache")
            .field("len", &inner.data.len())
            .field("capacity", &inner.capacity)
            .finish()
    }
}
