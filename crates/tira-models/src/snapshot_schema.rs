/// The SQLite table external fetch jobs write vendor payloads to and TIRA reads from.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS fetch_snapshots (
///     source          TEXT NOT NULL,
///     ticker          TEXT NOT NULL,
///     as_of           TEXT NOT NULL,   -- YYYY-MM-DD
///     payload_json    TEXT NOT NULL,
///     citations_json  TEXT NOT NULL,   -- JSON array of strings
///     fetched_at      TEXT NOT NULL,   -- RFC 3339
///     PRIMARY KEY (source, ticker, as_of)
/// );
/// ```
pub const SNAPSHOT_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS fetch_snapshots (
    source          TEXT NOT NULL,
    ticker          TEXT NOT NULL,
    as_of           TEXT NOT NULL,
    payload_json    TEXT NOT NULL,
    citations_json  TEXT NOT NULL,
    fetched_at      TEXT NOT NULL,
    PRIMARY KEY (source, ticker, as_of)
);
CREATE INDEX IF NOT EXISTS idx_snapshots_ticker ON fetch_snapshots(ticker, as_of);
";

/// Memo key for one fetch: `{source}:{ticker}:{as_of}` (e.g., `news:AAPL:2024-05-10`).
pub fn snapshot_key(source: &str, ticker: &str, as_of: &str) -> String {
    format!("{source}:{ticker}:{as_of}")
}

/// A raw snapshot row as read from SQLite.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub source: String,
    pub ticker: String,
    pub as_of: String,
    pub payload_json: String,
    pub citations_json: String,
    pub fetched_at: String,
}
