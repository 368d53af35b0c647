use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tira_models::fetch::FetchPayload;
use tira_models::snapshot_schema::{snapshot_key, SnapshotRow};
use tracing::debug;

use crate::error::CacheError;
use crate::memory::MemoryCache;
use crate::sqlite::SnapshotReader;

/// Read-through snapshot cache: checks moka (hot) → SQLite (shared) → None.
///
/// SQLite hits are promoted to moka. SQLite access is synchronized via `Mutex`
/// since `rusqlite::Connection` is not `Sync`.
pub struct SnapshotCache {
    memory: MemoryCache,
    sqlite: Mutex<SnapshotReader>,
}

impl SnapshotCache {
    pub fn new(sqlite: SnapshotReader, max_capacity: u64, memory_ttl: Duration) -> Self {
        Self {
            memory: MemoryCache::new(max_capacity, memory_ttl),
            sqlite: Mutex::new(sqlite),
        }
    }

    /// Latest payload for `source`/`ticker` dated on or before `as_of`.
    pub async fn payload(
        &self,
        source: &str,
        ticker: &str,
        as_of: NaiveDate,
    ) -> Result<Option<FetchPayload>, CacheError> {
        let date = as_of.format("%Y-%m-%d").to_string();
        let key = snapshot_key(source, ticker, &date);

        if let Some(json) = self.memory.get(&key).await {
            debug!(%key, "snapshot served from memory");
            return Ok(Some(serde_json::from_str(&json)?));
        }

        let row = {
            let sqlite = self
                .sqlite
                .lock()
                .map_err(|e| CacheError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
            sqlite.latest_on_or_before(source, ticker, &date)?
        };

        let Some(row) = row else {
            return Ok(None);
        };

        let payload = row_to_payload(&row)?;
        self.memory
            .insert(key, serde_json::to_string(&payload)?)
            .await;
        Ok(Some(payload))
    }

    /// Number of payloads currently held in the hot cache.
    pub fn hot_cache_size(&self) -> u64 {
        self.memory.entry_count()
    }
}

/// Decode a raw row into the payload shape analysts consume.
pub fn row_to_payload(row: &SnapshotRow) -> Result<FetchPayload, CacheError> {
    let key = snapshot_key(&row.source, &row.ticker, &row.as_of);
    let malformed = |reason: String| CacheError::Malformed {
        key: key.clone(),
        reason,
    };

    let as_of = NaiveDate::parse_from_str(&row.as_of, "%Y-%m-%d")
        .map_err(|e| malformed(format!("as_of: {e}")))?;
    let fetched_at = DateTime::parse_from_rfc3339(&row.fetched_at)
        .map_err(|e| malformed(format!("fetched_at: {e}")))?
        .with_timezone(&Utc);
    let data: serde_json::Value = serde_json::from_str(&row.payload_json)?;
    let citations: Vec<String> = serde_json::from_str(&row.citations_json)?;

    Ok(FetchPayload {
        source: row.source.clone(),
        ticker: row.ticker.clone(),
        as_of,
        data,
        citations,
        fetched_at,
    })
}
