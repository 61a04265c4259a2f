use moka::future::Cache;
use std::time::Duration;

/// In-memory hot cache of serialized responses, backed by moka.
///
/// Entries are automatically evicted after TTL.
pub struct HotCache {
    inner: Cache<String, String>,
}

impl HotCache {
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

    /// Entry count after pending evictions and inserts are applied.
    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}
