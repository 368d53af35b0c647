use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::join_all;
use tira_cache::{FetchMemo, SnapshotCache};
use tira_models::{FetchPayload, FetchRecord};
use tracing::{debug, warn};

use crate::error::{AgentError, FetchError};

/// A vendor data adapter. Implementations must be safe to call concurrently.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, ticker: &str, as_of: NaiveDate) -> Result<FetchPayload, FetchError>;
}

/// Serves vendor payloads from the shared snapshot database.
pub struct SnapshotSource {
    name: String,
    cache: Arc<SnapshotCache>,
}

impl SnapshotSource {
    pub fn new(name: impl Into<String>, cache: Arc<SnapshotCache>) -> Self {
        Self {
            name: name.into(),
            cache,
        }
    }
}

#[async_trait]
impl DataSource for SnapshotSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, ticker: &str, as_of: NaiveDate) -> Result<FetchPayload, FetchError> {
        match self.cache.payload(&self.name, ticker, as_of).await {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(FetchError::NotFound {
                data_source: self.name.clone(),
                ticker: ticker.to_string(),
                as_of,
            }),
            Err(e) => Err(FetchError::Unavailable {
                data_source: self.name.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

/// The data tools handed to one analyst invocation.
///
/// Every successful fetch lands in a ledger. The ledger, not the analyst's own account,
/// decides whether the resulting report counts as grounded.
pub struct ToolBox {
    ticker: String,
    as_of: NaiveDate,
    sources: Vec<Arc<dyn DataSource>>,
    memo: FetchMemo,
    ledger: Mutex<Vec<FetchRecord>>,
}

impl ToolBox {
    pub fn new(
        ticker: impl Into<String>,
        as_of: NaiveDate,
        sources: Vec<Arc<dyn DataSource>>,
        memo: FetchMemo,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            as_of,
            sources,
            memo,
            ledger: Mutex::new(Vec::new()),
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Fetch from one named source, reusing this run's memo when possible.
    pub async fn fetch(&self, source_name: &str) -> Result<FetchPayload, AgentError> {
        let source = self
            .sources
            .iter()
            .find(|s| s.name() == source_name)
            .ok_or_else(|| FetchError::UnknownSource(source_name.to_string()))?;

        match self.memo.get(source_name, &self.ticker, self.as_of).await {
            Ok(Some(payload)) => {
                debug!(source = source_name, ticker = %self.ticker, "fetch served from run memo");
                self.record(&payload, true);
                return Ok(payload);
            }
            Ok(None) => {}
            Err(e) => warn!(source = source_name, error = %e, "run memo unreadable, refetching"),
        }

        let payload = source.fetch(&self.ticker, self.as_of).await?;
        if payload.is_empty() {
            return Err(FetchError::NotFound {
                data_source: source_name.to_string(),
                ticker: self.ticker.clone(),
                as_of: self.as_of,
            }
            .into());
        }

        if let Err(e) = self.memo.put(source_name, &self.ticker, self.as_of, &payload).await {
            warn!(source = source_name, error = %e, "failed to memoize fetch");
        }
        self.record(&payload, false);
        Ok(payload)
    }

    /// Fetch every configured source concurrently. Results keep the configured order.
    pub async fn fetch_all(&self) -> Vec<Result<FetchPayload, AgentError>> {
        let names: Vec<String> = self.sources.iter().map(|s| s.name().to_string()).collect();
        join_all(names.iter().map(|name| self.fetch(name))).await
    }

    /// True once at least one fetch returned data during this invocation.
    pub fn has_tool_data(&self) -> bool {
        self.ledger.lock().map(|l| !l.is_empty()).unwrap_or(false)
    }

    pub fn records(&self) -> Vec<FetchRecord> {
        self.ledger.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn record(&self, payload: &FetchPayload, from_cache: bool) {
        let mut record = FetchRecord::from(payload);
        record.from_cache = from_cache;
        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.push(record);
        }
    }
}
