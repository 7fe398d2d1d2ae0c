//! Node result cache
//!
//! Nodes configured with a [`CachePolicy`] have their writes stored in a
//! [`NodeCache`] keyed by node name and input. When a later task of the same
//! node sees an identical input while the entry is live, the cached writes are
//! reused and the node body does not run.
//!
//! ```text
//! task(node, input) ──► key = uuid5(node, input)
//!                          │
//!          hit ◄───────────┤───────────► miss
//!   reuse cached writes         run node, store writes with policy TTL
//! ```
//!
//! Entries expire after their TTL; when the cache is full the least recently
//! used entry is evicted.

use pregel_checkpoint::derive_id;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Cache entry with access metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: usize,
    pub expires_at: Option<Instant>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_accessed: now,
            access_count: 1,
            expires_at: ttl.map(|duration| now + duration),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expiry| Instant::now() >= expiry)
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }
}

/// Which entry to drop when the cache is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Least recently used
    #[default]
    Lru,
    /// Oldest entry
    Fifo,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_size: usize,
    /// TTL applied when an entry is stored without one
    pub default_ttl: Option<Duration>,
    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: None,
            eviction_policy: EvictionPolicy::Lru,
        }
    }
}

/// Hit/miss counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: usize,
    pub misses: usize,
    pub evictions: usize,
    pub entries: usize,
}

impl CacheMetrics {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    metrics: CacheMetrics,
}

/// Generic in-memory TTL cache
///
/// Cloning shares the underlying storage.
pub struct Cache<K, V> {
    inner: Arc<RwLock<CacheInner<K, V>>>,
    config: CacheConfig,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: self.config.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("config", &self.config).finish()
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                entries: HashMap::new(),
                metrics: CacheMetrics::default(),
            })),
            config,
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let expired = match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.touch();
                let value = entry.value.clone();
                inner.metrics.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(key);
            inner.metrics.entries = inner.entries.len();
        }
        inner.metrics.misses += 1;
        None
    }

    pub async fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.config.default_ttl).await;
    }

    pub async fn put_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        if inner.entries.len() >= self.config.max_size && !inner.entries.contains_key(&key) {
            self.evict(inner);
        }
        inner.entries.insert(key, CacheEntry::new(value, ttl));
        inner.metrics.entries = inner.entries.len();
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let entry = inner.entries.remove(key);
        inner.metrics.entries = inner.entries.len();
        entry.map(|e| e.value)
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.metrics.entries = 0;
    }

    pub async fn metrics(&self) -> CacheMetrics {
        self.inner.read().await.metrics
    }

    fn evict(&self, inner: &mut CacheInner<K, V>) {
        // Expired entries go first regardless of policy
        let expired = inner
            .entries
            .iter()
            .find(|(_, entry)| entry.is_expired())
            .map(|(k, _)| k.clone());
        let victim = expired.or_else(|| match self.config.eviction_policy {
            EvictionPolicy::Lru => inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Fifo => inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(k, _)| k.clone()),
        });
        if let Some(key) = victim {
            inner.entries.remove(&key);
            inner.metrics.evictions += 1;
        }
    }
}

/// Writes produced by one node execution
pub type CachedWrites = Vec<(String, Value)>;

/// Cache of node writes keyed by [`cache_key`]
pub type NodeCache = Cache<String, CachedWrites>;

/// Per-node cache settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Entry lifetime in seconds; entries never expire when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl.as_secs());
        self
    }

    pub fn ttl_duration(&self) -> Option<Duration> {
        self.ttl.map(Duration::from_secs)
    }
}

/// Deterministic key of a node execution
pub fn cache_key(node: &str, input: &Value) -> String {
    derive_id(node, &input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_hit_and_miss() {
        let cache: NodeCache = Cache::new(CacheConfig::default());
        let key = cache_key("double", &json!({"x": 2}));
        assert!(cache.get(&key).await.is_none());

        cache.put(key.clone(), vec![("out".to_string(), json!(4))]).await;
        assert_eq!(cache.get(&key).await, Some(vec![("out".to_string(), json!(4))]));

        let metrics = cache.metrics().await;
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hit_ratio(), 0.5);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache: Cache<String, i32> = Cache::new(CacheConfig::default());
        cache
            .put_with_ttl("k".to_string(), 1, Some(Duration::from_millis(10)))
            .await;
        assert_eq!(cache.get(&"k".to_string()).await, Some(1));

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(cache.get(&"k".to_string()).await, None);
        assert_eq!(cache.metrics().await.entries, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache: Cache<&str, i32> = Cache::new(CacheConfig {
            max_size: 2,
            ..CacheConfig::default()
        });
        cache.put("a", 1).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.put("b", 2).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.get(&"a").await;
        cache.put("c", 3).await;

        assert_eq!(cache.get(&"a").await, Some(1));
        assert_eq!(cache.get(&"b").await, None);
        assert_eq!(cache.metrics().await.evictions, 1);
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = cache_key("n", &json!({"b": 1, "a": 2}));
        let b = cache_key("n", &json!({"a": 2, "b": 1}));
        assert_eq!(a, b);
        assert_ne!(a, cache_key("m", &json!({"a": 2, "b": 1})));
    }
}
