use std::time::Duration;

use chrono::NaiveDate;
use tira_models::fetch::FetchPayload;
use tira_models::snapshot_schema::snapshot_key;

use crate::error::CacheError;
use crate::memory::MemoryCache;

/// Per-run memo of fetch results.
///
/// Built fresh for every run and dropped with it, so retries of an analyst reuse the
/// payloads already fetched in this run without sharing anything across runs.
#[derive(Clone)]
pub struct FetchMemo {
    memory: MemoryCache,
}

impl FetchMemo {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            memory: MemoryCache::new(max_capacity, ttl),
        }
    }

    pub async fn get(
        &self,
        source: &str,
        ticker: &str,
        as_of: NaiveDate,
    ) -> Result<Option<FetchPayload>, CacheError> {
        match self.memory.get(&memo_key(source, ticker, as_of)).await {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Remember `payload` as the answer to a `source`/`ticker` request dated `requested`.
    ///
    /// The key comes from the request, not the payload, since a source may label or
    /// date its payload differently from the name it was asked under.
    pub async fn put(
        &self,
        source: &str,
        ticker: &str,
        requested: NaiveDate,
        payload: &FetchPayload,
    ) -> Result<(), CacheError> {
        self.memory
            .insert(memo_key(source, ticker, requested), serde_json::to_string(payload)?)
            .await;
        Ok(())
    }
}

fn memo_key(source: &str, ticker: &str, as_of: NaiveDate) -> String {
    snapshot_key(source, ticker, &as_of.format("%Y-%m-%d").to_string())
}
