use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed snapshot row {key}: {reason}")]
    Malformed { key: String, reason: String },

    #[error("Snapshot store not available: {0}")]
    Unavailable(String),
}
