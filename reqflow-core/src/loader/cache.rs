//! Per-key memo with LRU eviction and TTL expiration.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;

/// A memoized value with its insertion time
struct CachedEntry<V> {
    value: V,
    created_at: Instant,
}

impl<V> CachedEntry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

pub(crate) struct KeyCache<K: Hash + Eq, V> {
    entries: LruCache<K, CachedEntry<V>>,
    ttl: Option<Duration>,
}

impl<K: Hash + Eq, V> KeyCache<K, V> {
    /// Create a cache holding at most `capacity` keys (unbounded if `None`)
    pub fn new(capacity: Option<usize>, ttl: Option<Duration>) -> Self {
        let entries = match capacity.and_then(|n| NonZeroUsize::new(n.max(1))) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self { entries, ttl }
    }

    /// Look up a live entry, dropping it if it has expired
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let expired = match self.entries.get(key) {
            Some(entry) => self.ttl.is_some_and(|ttl| entry.is_expired(ttl)),
            None => return None,
        };

        if expired {
            self.entries.pop(key);
            return None;
        }
        self.entries.peek(key).map(|entry| &entry.value)
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.entries.put(key, CachedEntry { value, created_at: Instant::now() });
    }

    pub fn remove(&mut self, key: &K) -> bool {
        self.entries.pop(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Remove expired entries (call periodically for cleanup)
    pub fn evict_expired(&mut self) -> usize
    where
        K: Clone,
    {
        let Some(ttl) = self.ttl else { return 0 };

        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(ttl))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache = KeyCache::new(None, None);
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = KeyCache::new(Some(2), None);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" becomes least recently used
        cache.get(&"a");
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&"b").is_none());
        assert!(cache.get(&"a").is_some());
    }

    #[test]
    fn test_insert_replaces_and_remove() {
        let mut cache = KeyCache::new(None, None);
        cache.insert("a", 1);
        cache.insert("a", 2);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a"), Some(&2));
        assert!(cache.remove(&"a"));
        assert!(!cache.remove(&"a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let mut cache = KeyCache::new(None, Some(Duration::from_secs(10)));
        cache.insert("a", 1);
        cache.insert("b", 2);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.get(&"a"), Some(&1));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get(&"a").is_none());
        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 0);
    }
}
