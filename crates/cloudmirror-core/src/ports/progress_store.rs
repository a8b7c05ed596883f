//! Progress store port (driven/secondary port)
//!
//! This module defines the interface for persisting per-file transfer state
//! and the failure log.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   and don't need domain-level classification.
//! - The store holds no business logic. Every invariant on a record is
//!   enforced by [`SyncRecord`] itself before it is handed to `save_record`.
//! - One record per remote id; each record is readable and writable
//!   independently of all others.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ErrorKind, LocalState, RelativePath, RemoteId, SyncRecord};

// ============================================================================
// RecordFilter
// ============================================================================

/// Filter criteria for listing sync records
///
/// All fields are optional; when `None`, no filtering is applied for that field.
/// Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Filter by local state
    pub state: Option<LocalState>,
    /// Filter by path prefix (records at or beneath this path)
    pub path_prefix: Option<RelativePath>,
}

impl RecordFilter {
    /// Creates a new empty filter (matches all records)
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the state filter
    pub fn with_state(mut self, state: LocalState) -> Self {
        self.state = Some(state);
        self
    }

    /// Sets the path prefix filter
    pub fn with_path_prefix(mut self, prefix: RelativePath) -> Self {
        self.path_prefix = Some(prefix);
        self
    }

    /// Whether a record satisfies this filter
    pub fn matches(&self, record: &SyncRecord) -> bool {
        if self.state.is_some_and(|s| s != record.state()) {
            return false;
        }
        if let Some(prefix) = &self.path_prefix {
            if prefix != record.path() && !prefix.is_ancestor_of(record.path()) {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// StateCounts
// ============================================================================

/// Number of records in each local state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub complete: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl StateCounts {
    /// Add `n` records in `state`
    pub fn add(&mut self, state: LocalState, n: u64) {
        match state {
            LocalState::Pending => self.pending += n,
            LocalState::InProgress => self.in_progress += n,
            LocalState::Complete => self.complete += n,
            LocalState::Failed => self.failed += n,
            LocalState::Skipped => self.skipped += n,
        }
    }

    /// Count for one state
    pub fn get(&self, state: LocalState) -> u64 {
        match state {
            LocalState::Pending => self.pending,
            LocalState::InProgress => self.in_progress,
            LocalState::Complete => self.complete,
            LocalState::Failed => self.failed,
            LocalState::Skipped => self.skipped,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.complete + self.failed + self.skipped
    }
}

// ============================================================================
// ErrorLogEntry
// ============================================================================

/// One row of the append-only failure log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub remote_id: RemoteId,
    pub path: RelativePath,
    pub kind: ErrorKind,
    pub message: String,
    pub attempt_count: u32,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// IProgressStore trait
// ============================================================================

/// Durable record of per-file transfer state
#[async_trait::async_trait]
pub trait IProgressStore: Send + Sync {
    /// Insert or replace the record keyed by its remote id
    async fn save_record(&self, record: &SyncRecord) -> anyhow::Result<()>;

    /// Fetch one record
    async fn get_record(&self, id: &RemoteId) -> anyhow::Result<Option<SyncRecord>>;

    /// List records matching `filter`, ordered by path
    async fn list_records(&self, filter: &RecordFilter) -> anyhow::Result<Vec<SyncRecord>>;

    /// Remove a record; removing a missing record is not an error
    async fn delete_record(&self, id: &RemoteId) -> anyhow::Result<()>;

    /// Number of records per state
    async fn count_by_state(&self) -> anyhow::Result<StateCounts>;

    /// Append a failure to the error log
    async fn record_error(&self, entry: &ErrorLogEntry) -> anyhow::Result<()>;

    /// Most recent error log entries, newest first
    async fn list_errors(&self, limit: u32) -> anyhow::Result<Vec<ErrorLogEntry>>;
}
