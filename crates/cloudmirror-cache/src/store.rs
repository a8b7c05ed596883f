//! SQLite implementation of IProgressStore
//!
//! ## Type Mapping
//!
//! | Domain Type         | SQL Type | Strategy                                   |
//! |---------------------|----------|--------------------------------------------|
//! | RemoteId            | TEXT     | `.as_str()` / `RemoteId::new()`            |
//! | RelativePath        | TEXT     | `.as_str()` / `RelativePath::new()`        |
//! | Checksum            | TEXT     | lowercase hex / `Checksum::new()`          |
//! | LocalState          | TEXT     | `.name()` / `FromStr`                      |
//! | ErrorKind           | TEXT     | `.name()` / `FromStr`                      |
//! | ChunkBitmap         | BLOB     | packed bits + `chunk_count` column         |
//! | chunk digests       | TEXT     | serde_json object keyed by chunk index     |
//! | DateTime<Utc>       | TEXT     | RFC 3339                                   |
//! | u64 / u32 counters  | INTEGER  | `i64` casts                                |
//!
//! `bytes_completed` is written for the benefit of ad hoc SQL queries but is
//! recomputed from the bitmap when a row is read back.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use cloudmirror_core::domain::{
    Checksum, ChunkBitmap, ErrorKind, LastError, LocalState, RecordParts, RelativePath, RemoteId,
    SyncRecord,
};
use cloudmirror_core::ports::{ErrorLogEntry, IProgressStore, RecordFilter, StateCounts};

use crate::CacheError;

/// SQLite-backed progress store
///
/// Each record is a single row keyed by remote id, so writes for different
/// files never touch the same row.
#[derive(Clone)]
pub struct SqliteProgressStore {
    pool: SqlitePool,
}

impl SqliteProgressStore {
    /// Creates a new store over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Row conversion helpers
// ============================================================================

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CacheError::CorruptRow(format!("bad timestamp '{s}': {e}")))
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    s.as_deref().map(parse_datetime).transpose()
}

fn to_u64(value: i64, column: &str) -> Result<u64, CacheError> {
    u64::try_from(value).map_err(|_| CacheError::CorruptRow(format!("negative {column}: {value}")))
}

fn to_u32(value: i64, column: &str) -> Result<u32, CacheError> {
    u32::try_from(value).map_err(|_| CacheError::CorruptRow(format!("{column} out of range: {value}")))
}

fn record_from_row(row: &SqliteRow) -> Result<SyncRecord, CacheError> {
    let id: String = row.get("id");
    let path: String = row.get("path");
    let checksum: Option<String> = row.get("checksum");
    let size: i64 = row.get("size");
    let is_directory: bool = row.get("is_directory");
    let modified_time: String = row.get("modified_time");
    let chunk_size: i64 = row.get("chunk_size");
    let chunk_count: i64 = row.get("chunk_count");
    let state: String = row.get("state");
    let bitmap: Vec<u8> = row.get("chunk_bitmap");
    let digests: String = row.get("chunk_digests");
    let last_error_kind: Option<String> = row.get("last_error_kind");
    let last_error: Option<String> = row.get("last_error");
    let last_attempt_time: Option<String> = row.get("last_attempt_time");
    let attempt_count: i64 = row.get("attempt_count");
    let failure_count: i64 = row.get("failure_count");
    let corruption_count: i64 = row.get("corruption_count");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    let chunk_digests: BTreeMap<u32, String> = serde_json::from_str(&digests)
        .map_err(|e| CacheError::CorruptRow(format!("bad chunk_digests for {id}: {e}")))?;

    let last_error = match (last_error_kind, last_error) {
        (Some(kind), message) => Some(LastError::new(
            ErrorKind::from_str(&kind)?,
            message.unwrap_or_default(),
        )),
        (None, _) => None,
    };

    let parts = RecordParts {
        id: RemoteId::new(id)?,
        path: RelativePath::new(path)?,
        checksum: checksum.map(|c| c.parse::<Checksum>()).transpose()?,
        size: to_u64(size, "size")?,
        is_directory,
        modified_time: parse_datetime(&modified_time)?,
        chunk_size: to_u64(chunk_size, "chunk_size")?,
        state: LocalState::from_str(&state)?,
        chunk_bitmap: ChunkBitmap::from_bytes(to_u32(chunk_count, "chunk_count")?, bitmap)?,
        chunk_digests,
        last_error,
        last_attempt_time: parse_optional_datetime(last_attempt_time)?,
        attempt_count: to_u32(attempt_count, "attempt_count")?,
        failure_count: to_u32(failure_count, "failure_count")?,
        corruption_count: to_u32(corruption_count, "corruption_count")?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    };

    Ok(SyncRecord::restore(parts)?)
}

fn error_entry_from_row(row: &SqliteRow) -> Result<ErrorLogEntry, CacheError> {
    let remote_id: String = row.get("remote_id");
    let path: String = row.get("path");
    let kind: String = row.get("kind");
    let attempt_count: i64 = row.get("attempt_count");
    let timestamp: String = row.get("timestamp");

    Ok(ErrorLogEntry {
        remote_id: RemoteId::new(remote_id)?,
        path: RelativePath::new(path)?,
        kind: ErrorKind::from_str(&kind)?,
        message: row.get("message"),
        attempt_count: to_u32(attempt_count, "attempt_count")?,
        timestamp: parse_datetime(&timestamp)?,
    })
}

// ============================================================================
// IProgressStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IProgressStore for SqliteProgressStore {
    async fn save_record(&self, record: &SyncRecord) -> anyhow::Result<()> {
        let digests = serde_json::to_string(record.chunk_digests())
            .map_err(|e| anyhow::anyhow!("Failed to serialize chunk digests: {e}"))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sync_records (
                id, path, checksum, size, is_directory, modified_time,
                chunk_size, chunk_count, state, bytes_completed, chunk_bitmap,
                chunk_digests, last_error_kind, last_error, last_attempt_time,
                attempt_count, failure_count, corruption_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id().as_str())
        .bind(record.path().as_str())
        .bind(record.checksum().map(|c| c.as_str()))
        .bind(record.size() as i64)
        .bind(record.is_directory())
        .bind(record.modified_time().to_rfc3339())
        .bind(record.chunk_size() as i64)
        .bind(i64::from(record.chunk_bitmap().len()))
        .bind(record.state().name())
        .bind(record.bytes_completed() as i64)
        .bind(record.chunk_bitmap().as_bytes())
        .bind(digests)
        .bind(record.last_error().map(|e| e.kind.name()))
        .bind(record.last_error().map(|e| e.message.as_str()))
        .bind(record.last_attempt_time().map(|t| t.to_rfc3339()))
        .bind(i64::from(record.attempt_count()))
        .bind(i64::from(record.failure_count()))
        .bind(i64::from(record.corruption_count()))
        .bind(record.created_at().to_rfc3339())
        .bind(record.updated_at().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(
            id = %record.id(),
            state = %record.state(),
            bytes = record.bytes_completed(),
            "Saved sync record"
        );
        Ok(())
    }

    async fn get_record(&self, id: &RemoteId) -> anyhow::Result<Option<SyncRecord>> {
        let row = sqlx::query("SELECT * FROM sync_records WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(record_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_records(&self, filter: &RecordFilter) -> anyhow::Result<Vec<SyncRecord>> {
        let mut sql = String::from("SELECT * FROM sync_records WHERE 1=1");
        if filter.state.is_some() {
            sql.push_str(" AND state = ?");
        }
        if filter.path_prefix.is_some() {
            sql.push_str(" AND (path = ? OR substr(path, 1, ?) = ?)");
        }
        sql.push_str(" ORDER BY path ASC");

        let mut query = sqlx::query(&sql);
        if let Some(state) = filter.state {
            query = query.bind(state.name());
        }
        if let Some(prefix) = &filter.path_prefix {
            let with_slash = format!("{}/", prefix.as_str());
            query = query
                .bind(prefix.as_str().to_string())
                .bind(with_slash.len() as i64)
                .bind(with_slash);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn delete_record(&self, id: &RemoteId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sync_records WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        tracing::debug!(id = %id, "Deleted sync record");
        Ok(())
    }

    async fn count_by_state(&self) -> anyhow::Result<StateCounts> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM sync_records GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StateCounts::default();
        for row in rows {
            let state: String = row.get("state");
            let n: i64 = row.get("n");
            counts.add(LocalState::from_str(&state)?, to_u64(n, "count")?);
        }
        Ok(counts)
    }

    async fn record_error(&self, entry: &ErrorLogEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO error_log (remote_id, path, kind, message, attempt_count, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.remote_id.as_str())
        .bind(entry.path.as_str())
        .bind(entry.kind.name())
        .bind(entry.message.as_str())
        .bind(i64::from(entry.attempt_count))
        .bind(entry.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_errors(&self, limit: u32) -> anyhow::Result<Vec<ErrorLogEntry>> {
        let rows = sqlx::query("SELECT * FROM error_log ORDER BY id DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        let entries = rows
            .iter()
            .map(error_entry_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
