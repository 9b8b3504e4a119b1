//! A TTL'd, thread-safe key/value store with LRU eviction.
//!
//! Each probe family owns its own `TtlCache` instance; there is no
//! process-wide registry. Entries whose expiration has passed are
//! removed on read and treated as a miss.

use lru_cache::LruCache;
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Item<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, Item<V>>>,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up `key`. An entry whose `expires_at` is in the past is
    /// evicted and reported as a miss.
    pub fn get<Q: ?Sized>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let mut cache = self.inner.lock();
        let entry = cache.get_mut(key)?;
        if Instant::now() < entry.expires_at {
            Some(entry.value.clone())
        } else {
            cache.remove(key);
            None
        }
    }

    pub fn insert(&self, key: K, value: V, ttl: Duration) -> V {
        self.inner.lock().insert(
            key,
            Item {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        value
    }

    /// Get an existing entry, or invoke `func` to compute a value that is
    /// inserted and returned. Atomic wrt. other callers on the same cache.
    pub fn get_or_insert<F: FnOnce() -> V>(&self, key: K, ttl: Duration, func: F) -> V {
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get_mut(&key) {
            if Instant::now() < entry.expires_at {
                return entry.value.clone();
            }
        }
        let value = func();
        cache.insert(
            key,
            Item {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        value
    }

    pub fn clear(&self) -> usize {
        let mut cache = self.inner.lock();
        let num_entries = cache.len();
        cache.clear();
        num_entries
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hit_and_miss() {
        let cache: TtlCache<String, u32> = TtlCache::new(8);
        assert_eq!(cache.get("example.com"), None);
        cache.insert("example.com".to_string(), 42, Duration::from_secs(60));
        assert_eq!(cache.get("example.com"), Some(42));
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache: TtlCache<String, u32> = TtlCache::new(8);
        cache.insert("example.com".to_string(), 42, Duration::from_secs(0));
        assert_eq!(cache.get("example.com"), None);
        assert!(cache.is_empty(), "expired entry must be evicted on read");
    }

    #[test]
    fn get_or_insert_computes_once() {
        let cache: TtlCache<String, u32> = TtlCache::new(8);
        let mut calls = 0;
        for _ in 0..3 {
            let v = cache.get_or_insert("k".to_string(), Duration::from_secs(60), || {
                calls += 1;
                7
            });
            assert_eq!(v, 7);
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn lru_eviction_respects_capacity() {
        let cache: TtlCache<u32, u32> = TtlCache::new(2);
        cache.insert(1, 1, Duration::from_secs(60));
        cache.insert(2, 2, Duration::from_secs(60));
        cache.insert(3, 3, Duration::from_secs(60));
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(2));
        assert_eq!(cache.get(&3), Some(3));
    }
}
