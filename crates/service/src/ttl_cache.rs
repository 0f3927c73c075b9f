use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Bounded map whose entries expire after a per-entry lifetime.
#[derive(Clone)]
pub struct TtlCache<K, V> {
    cache: Arc<RwLock<HashMap<K, CachedEntry<V>>>>,
    max_entries: usize,
}

#[derive(Clone)]
struct CachedEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            max_entries,
        }
    }

    pub fn enabled(&self) -> bool {
        self.max_entries > 0
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        if !self.enabled() {
            return None;
        }

        let now = Instant::now();
        let cache = self.cache.read().await;
        cache
            .get(key)
            .and_then(|entry| (entry.expires_at > now).then(|| entry.value.clone()))
    }

    pub async fn put(&self, key: K, value: V, ttl: Duration) {
        if !self.enabled() || ttl.is_zero() {
            return;
        }

        let now = Instant::now();
        let expires_at = now + ttl;
        let mut cache = self.cache.write().await;

        cache.retain(|_, entry| entry.expires_at > now);
        cache.insert(key.clone(), CachedEntry { value, expires_at });

        if cache.len() <= self.max_entries {
            return;
        }

        let mut overflow = cache.len() - self.max_entries;
        let keys = cache
            .keys()
            .filter(|k| **k != key)
            .cloned()
            .collect::<Vec<_>>();
        for k in keys {
            if overflow == 0 {
                break;
            }
            if cache.remove(&k).is_some() {
                overflow -= 1;
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_expire() {
        let cache = TtlCache::new(4);
        cache.put("k", 1, Duration::from_millis(5)).await;
        assert_eq!(cache.get(&"k").await, Some(1));
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(cache.get(&"k").await, None);
    }

    #[tokio::test]
    async fn overflow_evicts_older_keys_but_keeps_newest() {
        let cache = TtlCache::new(2);
        for k in ["a", "b", "c"] {
            cache.put(k, k.len(), Duration::from_secs(60)).await;
        }
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get(&"c").await, Some(1));
    }

    #[tokio::test]
    async fn zero_capacity_disables_cache() {
        let cache = TtlCache::new(0);
        cache.put("k", 1, Duration::from_secs(60)).await;
        assert_eq!(cache.get(&"k").await, None);
    }
}
