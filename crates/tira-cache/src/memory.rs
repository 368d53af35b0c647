use moka::future::Cache;
use std::time::Duration;

/// In-memory hot cache backed by moka, holding serialized payloads.
///
/// Entries are evicted after TTL or when capacity is exceeded.
#[derive(Clone)]
pub struct MemoryCache {
    inner: Cache<String, String>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: String, value: String) {
        self.inner.insert(key, value).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_get() {
        let cache = MemoryCache::new(100, Duration::from_secs(60));
        cache
            .insert("prices:AAPL:2024-05-10".to_string(), "{}".to_string())
            .await;
        assert_eq!(
            cache.get("prices:AAPL:2024-05-10").await,
            Some("{}".to_string())
        );
        assert_eq!(cache.get("prices:MSFT:2024-05-10").await, None);
    }

    #[tokio::test]
    async fn ttl_expiration() {
        let cache = MemoryCache::new(100, Duration::from_millis(50));
        cache.insert("key1".to_string(), "value1".to_string()).await;
        assert!(cache.get("key1").await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.get("key1").await.is_none());
    }
}
