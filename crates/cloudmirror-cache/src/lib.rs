//! CloudMirror Cache - SQLite progress store
//!
//! Persists what the sync engine knows about each remote entry so an
//! interrupted run can resume chunk by chunk:
//!
//! | Table          | Contents                                                  |
//! |----------------|-----------------------------------------------------------|
//! | `sync_records` | One row per remote id: state, chunk bitmap and digests, counters |
//! | `error_log`    | Append-only file-level failures, read newest first        |
//!
//! [`SqliteProgressStore`] is the `IProgressStore` adapter; it holds no sync
//! logic of its own. [`DatabasePool`] opens the file (or an in-memory
//! database for tests) and applies the embedded migrations.
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use cloudmirror_cache::{DatabasePool, SqliteProgressStore};
//! use cloudmirror_core::ports::IProgressStore;
//!
//! # async fn open() -> anyhow::Result<Arc<dyn IProgressStore>> {
//! let pool = DatabasePool::new(Path::new("/var/lib/cloudmirror/progress.db")).await?;
//! Ok(Arc::new(SqliteProgressStore::new(pool.pool().clone())))
//! # }
//! ```

pub mod pool;
pub mod store;

pub use pool::DatabasePool;
pub use store::SqliteProgressStore;

use cloudmirror_core::domain::DomainError;

/// Errors raised by the progress store
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The database file could not be opened or created
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// An embedded migration did not apply
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row no longer decodes into a valid record
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl From<DomainError> for CacheError {
    fn from(e: DomainError) -> Self {
        CacheError::CorruptRow(e.to_string())
    }
}
