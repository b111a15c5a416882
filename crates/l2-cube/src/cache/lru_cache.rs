//! Bounded LRU cache that disposes of the values it drops.

use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::CacheStats;

/// Callback invoked with every value the cache evicts, replaces or clears.
pub type Disposer<V> = Box<dyn Fn(V) + Send + Sync>;

/// LRU cache with a fixed number of entries and a disposal callback.
///
/// A cache with `max_size == 0` stores nothing: `put` drops the value
/// without disposing it and `get` always misses.
///
/// The cache is not synchronized; owners that share it between threads
/// wrap it in a `Mutex`.
pub struct LruCache<K, V> {
    cache: Option<lru::LruCache<K, V>>,
    max_size: usize,
    disposer: Option<Disposer<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K: Hash + Eq, V> LruCache<K, V> {
    /// Create a cache that simply drops evicted values.
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(max_size).map(lru::LruCache::new),
            max_size,
            disposer: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a cache that passes every dropped value to `disposer`.
    pub fn with_disposer(max_size: usize, disposer: impl Fn(V) + Send + Sync + 'static) -> Self {
        Self {
            disposer: Some(Box::new(disposer)),
            ..Self::new(max_size)
        }
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let value = self.cache.as_mut().and_then(|c| c.get(key));
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Check if a key exists without updating LRU order.
    pub fn contains(&self, key: &K) -> bool {
        self.cache.as_ref().is_some_and(|c| c.contains(key))
    }

    /// Insert `value` as the most recently used entry.
    ///
    /// A previous value for `key` is disposed. If the cache is full, the
    /// least recently used entry is evicted and disposed.
    pub fn put(&mut self, key: K, value: V) {
        let Some(cache) = self.cache.as_mut() else {
            return;
        };
        if let Some((_, dropped)) = cache.push(key, value) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            self.dispose(dropped);
        }
    }

    /// Remove and dispose every entry, most recently used first.
    pub fn clear(&mut self) {
        let Some(cache) = self.cache.as_mut() else {
            return;
        };
        let mut values = Vec::with_capacity(cache.len());
        while let Some((_, value)) = cache.pop_lru() {
            values.push(value);
        }
        for value in values.into_iter().rev() {
            self.dispose(value);
        }
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.cache
            .as_ref()
            .map(|c| c.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }

    /// Maximum number of entries.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Get the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.len())
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn dispose(&self, value: V) {
        if let Some(disposer) = &self.disposer {
            disposer(value);
        }
    }
}

impl<K: Hash + Eq, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("max_size", &self.max_size)
            .field("len", &self.cache.as_ref().map_or(0, |c| c.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_cache(max_size: usize) -> (LruCache<u32, String>, Arc<Mutex<Vec<String>>>) {
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let sink = disposed.clone();
        let cache = LruCache::with_disposer(max_size, move |v: String| {
            sink.lock().unwrap().push(v);
        });
        (cache, disposed)
    }

    #[test]
    fn test_get_and_put() {
        let (mut cache, disposed) = recording_cache(2);
        assert!(cache.get(&1).is_none());
        cache.put(1, "a".into());
        cache.put(2, "b".into());
        assert_eq!(cache.get(&1).map(String::as_str), Some("a"));
        assert_eq!(cache.keys(), vec![1, 2]);
        assert_eq!(cache.len(), 2);
        assert!(disposed.lock().unwrap().is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_get_makes_entry_most_recent() {
        let (mut cache, disposed) = recording_cache(2);
        cache.put(1, "a".into());
        cache.put(2, "b".into());
        cache.get(&1);
        cache.put(3, "c".into());
        assert_eq!(*disposed.lock().unwrap(), vec!["b".to_string()]);
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
    }

    #[test]
    fn test_replace_disposes_previous_value() {
        let (mut cache, disposed) = recording_cache(2);
        cache.put(1, "a".into());
        cache.put(1, "a2".into());
        assert_eq!(*disposed.lock().unwrap(), vec!["a".to_string()]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&1).map(String::as_str), Some("a2"));
    }

    #[test]
    fn test_bound_and_eviction_order() {
        let (mut cache, disposed) = recording_cache(3);
        for i in 0..7u32 {
            cache.put(i, format!("v{i}"));
            assert!(cache.len() <= 3);
        }
        assert_eq!(
            *disposed.lock().unwrap(),
            vec!["v0", "v1", "v2", "v3"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
        assert_eq!(cache.keys(), vec![6, 5, 4]);
        assert_eq!(cache.stats().evictions, 4);
    }

    #[test]
    fn test_clear_disposes_all_entries() {
        let (mut cache, disposed) = recording_cache(3);
        cache.put(1, "a".into());
        cache.put(2, "b".into());
        cache.put(3, "c".into());
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(
            *disposed.lock().unwrap(),
            vec!["c".to_string(), "b".to_string(), "a".to_string()]
        );

        // clearing an empty cache disposes nothing
        cache.clear();
        assert_eq!(disposed.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_zero_size_cache_stores_nothing() {
        let (mut cache, disposed) = recording_cache(0);
        cache.put(1, "a".into());
        assert!(cache.get(&1).is_none());
        assert!(cache.is_empty());
        cache.clear();
        assert!(disposed.lock().unwrap().is_empty());
        assert_eq!(cache.max_size(), 0);
    }

    #[test]
    fn test_debug_reports_size() {
        let (mut cache, _) = recording_cache(2);
        cache.put(1, "a".into());
        assert_eq!(format!("{cache:?}"), "LruCache { max_size: 2, len: 1 }");
        let (empty, _) = recording_cache(0);
        assert_eq!(format!("{empty:?}"), "LruCache { max_size: 0, len: 0 }");
    }
}
