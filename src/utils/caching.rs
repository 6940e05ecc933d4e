use moka::future::Cache;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// TTL and size of a moka cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    /// Spot prices (short TTL)
    pub fn price_data() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            max_capacity: 1_000,
        }
    }

    /// Incentive APY feed (one large document, refreshed rarely)
    pub fn reward_feed() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            max_capacity: 4,
        }
    }

    pub fn build<K, V>(&self) -> Cache<K, V>
    where
        K: Hash + Eq + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        Cache::builder()
            .max_capacity(self.max_capacity)
            .time_to_live(self.ttl)
            .build()
    }
}

/// Single value cache gated by age, for data read as one batch (reserve lists, market sets)
#[derive(Debug)]
pub struct TimedCache<T> {
    slot: RwLock<Option<(Instant, T)>>,
    ttl: Duration,
}

impl<T: Clone> TimedCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: RwLock::new(None),
            ttl,
        }
    }

    /// Cached value if it is younger than the TTL
    pub async fn get(&self) -> Option<T> {
        let slot = self.slot.read().await;
        slot.as_ref()
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    pub async fn put(&self, value: T) {
        *self.slot.write().await = Some((Instant::now(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timed_cache_expires() {
        let cache = TimedCache::new(Duration::from_millis(20));
        cache.put(vec![1u8, 2]).await;
        assert_eq!(cache.get().await, Some(vec![1, 2]));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get().await, None);
    }

    #[tokio::test]
    async fn test_built_cache_stores_values() {
        let cache: Cache<String, f64> = CacheConfig::price_data().build();
        cache.insert("USDC".to_string(), 1.0).await;
        assert_eq!(cache.get(&"USDC".to_string()).await, Some(1.0));
    }
}
