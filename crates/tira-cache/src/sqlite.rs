use rusqlite::{Connection, OptionalExtension, Row};
use tira_models::snapshot_schema::{SnapshotRow, SNAPSHOT_TABLE_DDL};

use crate::error::CacheError;

/// Read-only accessor for the shared vendor data snapshot.
///
/// The database is written by external fetch jobs; TIRA only reads it.
pub struct SnapshotReader {
    conn: Connection,
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        source: row.get(0)?,
        ticker: row.get(1)?,
        as_of: row.get(2)?,
        payload_json: row.get(3)?,
        citations_json: row.get(4)?,
        fetched_at: row.get(5)?,
    })
}

impl SnapshotReader {
    /// Open a read-only connection to the snapshot database.
    pub fn open(path: &str) -> Result<Self, CacheError> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Open an in-memory database with the schema applied. Writable so tests can seed rows.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SNAPSHOT_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// Exact lookup for one source, ticker and trading date.
    pub fn get(
        &self,
        source: &str,
        ticker: &str,
        as_of: &str,
    ) -> Result<Option<SnapshotRow>, CacheError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT source, ticker, as_of, payload_json, citations_json, fetched_at \
             FROM fetch_snapshots WHERE source = ?1 AND ticker = ?2 AND as_of = ?3",
        )?;
        let row = stmt
            .query_row(rusqlite::params![source, ticker, as_of], map_row)
            .optional()?;
        Ok(row)
    }

    /// Most recent snapshot on or before `as_of`. Avoids look-ahead past the trade date.
    pub fn latest_on_or_before(
        &self,
        source: &str,
        ticker: &str,
        as_of: &str,
    ) -> Result<Option<SnapshotRow>, CacheError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT source, ticker, as_of, payload_json, citations_json, fetched_at \
             FROM fetch_snapshots WHERE source = ?1 AND ticker = ?2 AND as_of <= ?3 \
             ORDER BY as_of DESC LIMIT 1",
        )?;
        let row = stmt
            .query_row(rusqlite::params![source, ticker, as_of], map_row)
            .optional()?;
        Ok(row)
    }

    /// Insert a snapshot row. In production the fetch jobs write directly to SQLite;
    /// this is for tests and seeding tools.
    pub fn insert(&self, row: &SnapshotRow) -> Result<(), CacheError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO fetch_snapshots \
             (source, ticker, as_of, payload_json, citations_json, fetched_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                row.source,
                row.ticker,
                row.as_of,
                row.payload_json,
                row.citations_json,
                row.fetched_at,
            ],
        )?;
        Ok(())
    }
}
