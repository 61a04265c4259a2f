use std::sync::Mutex;
use std::time::Duration;

use tradegraph_models::request::AnalysisResponse;
use uuid::Uuid;

use crate::error::StoreError;
use crate::memory::HotCache;
use crate::runs::RunStore;

/// Read-through run archive: moka (hot) -> SQLite (durable) -> None.
///
/// Writes go to both tiers. SQLite access is synchronized via `Mutex`
/// since `rusqlite::Connection` is not `Sync`.
pub struct RunArchive {
    hot: HotCache,
    sqlite: Mutex<RunStore>,
}

impl RunArchive {
    pub fn new(store: RunStore, max_capacity: u64, hot_ttl: Duration) -> Self {
        Self {
            hot: HotCache::new(max_capacity, hot_ttl),
            sqlite: Mutex::new(store),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RunStore>, StoreError> {
        self.sqlite
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    /// Persist a response keyed by its run id.
    pub async fn save(&self, response: &AnalysisResponse) -> Result<(), StoreError> {
        let json = {
            let store = self.lock()?;
            store.save(response)?
        };
        self.hot.insert(response.run_id.to_string(), json).await;
        tracing::debug!(run_id = %response.run_id, "Archived run");
        Ok(())
    }

    /// Get an archived response. Checks moka first, then SQLite; promotes SQLite hits.
    pub async fn get(&self, run_id: Uuid) -> Result<Option<AnalysisResponse>, StoreError> {
        let key = run_id.to_string();
        if let Some(json) = self.hot.get(&key).await {
            return Ok(Some(serde_json::from_str(&json)?));
        }

        let row = {
            let store = self.lock()?;
            store.get(&key)?
        };

        if let Some(row) = row {
            self.hot.insert(key, row.response_json.clone()).await;
            return Ok(Some(serde_json::from_str(&row.response_json)?));
        }

        Ok(None)
    }

    /// Parse and fetch a run id given as text.
    pub async fn get_str(&self, run_id: &str) -> Result<Option<AnalysisResponse>, StoreError> {
        let id = Uuid::parse_str(run_id.trim())
            .map_err(|e| StoreError::InvalidRunId(format!("{run_id}: {e}")))?;
        self.get(id).await
    }

    /// Most recent responses for an instrument, newest first.
    pub fn recent(
        &self,
        instrument_id: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisResponse>, StoreError> {
        let rows = {
            let store = self.lock()?;
            store.list_by_instrument(instrument_id, limit)?
        };
        rows.iter()
            .map(|row| serde_json::from_str(&row.response_json).map_err(StoreError::from))
            .collect()
    }

    /// Number of responses currently in the hot cache.
    pub async fn hot_cache_size(&self) -> u64 {
        self.hot.entry_count().await
    }
}
