use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Structured result of one data-source fetch, as handed to an analyst stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchPayload {
    /// Name of the data source that produced this payload (e.g., "prices", "news").
    pub source: String,
    pub ticker: String,
    /// The trading date the data describes.
    pub as_of: NaiveDate,
    /// Vendor data, kept as JSON so adapters stay free to choose their own shape.
    pub data: serde_json::Value,
    /// Citation-worthy references (article titles, filing ids, vendor endpoints).
    pub citations: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchPayload {
    /// Payload with no data points and no citations carries nothing an analyst can ground on.
    pub fn is_empty(&self) -> bool {
        let no_data = match &self.data {
            serde_json::Value::Null => true,
            serde_json::Value::Array(items) => items.is_empty(),
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        };
        no_data && self.citations.is_empty()
    }
}

/// Provenance entry attached to a report: one fetch that backed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchRecord {
    pub source: String,
    pub as_of: NaiveDate,
    pub fetched_at: DateTime<Utc>,
    pub citations: Vec<String>,
    /// True when the payload was served from the per-run memo instead of the source.
    pub from_cache: bool,
}

impl From<&FetchPayload> for FetchRecord {
    fn from(payload: &FetchPayload) -> Self {
        Self {
            source: payload.source.clone(),
            as_of: payload.as_of,
            fetched_at: payload.fetched_at,
            citations: payload.citations.clone(),
            from_cache: false,
        }
    }
}
