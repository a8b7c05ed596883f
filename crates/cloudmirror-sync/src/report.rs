//! Run reports
//!
//! Every task a run is handed ends in exactly one [`TaskStatus`]. The
//! [`SyncReport`] aggregates those outcomes with the byte counters and the
//! plan's orphan and permanent-failure lists.

use chrono::{DateTime, Utc};
use serde::Serialize;

use cloudmirror_core::domain::{ErrorKind, LastError, RelativePath, RemoteId, RunId};

use crate::diff::{Orphan, PathConflict, PermanentFailure};

/// Terminal state of one task within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    SkippedByFilter,
    Cancelled,
}

impl TaskStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::SkippedByFilter => "skipped_by_filter",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    pub id: RemoteId,
    pub path: RelativePath,
    pub is_directory: bool,
    pub status: TaskStatus,
    /// Bytes fetched from the remote for this file during this run
    pub bytes_transferred: u64,
    /// Set when `status` is `Failed`
    pub error: Option<LastError>,
}

impl FileOutcome {
    pub(crate) fn new(
        id: RemoteId,
        path: RelativePath,
        is_directory: bool,
        status: TaskStatus,
    ) -> Self {
        Self {
            id,
            path,
            is_directory,
            status,
            bytes_transferred: 0,
            error: None,
        }
    }

    pub(crate) fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes_transferred = bytes;
        self
    }

    pub(crate) fn with_error(mut self, error: LastError) -> Self {
        self.error = Some(error);
        self
    }
}

/// One failed file, as listed in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEntry {
    pub id: RemoteId,
    pub path: RelativePath,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub completed: u64,
    pub failed: u64,
    pub skipped_by_filter: u64,
    pub cancelled: u64,
}

impl OutcomeCounts {
    fn add(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::SkippedByFilter => self.skipped_by_filter += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.completed + self.failed + self.skipped_by_filter + self.cancelled
    }
}

/// Summary of one `run_sync` invocation
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per task, in completion order
    pub outcomes: Vec<FileOutcome>,
    pub counts: OutcomeCounts,
    pub failures: Vec<FailureEntry>,
    pub orphans: Vec<Orphan>,
    pub permanently_failed: Vec<PermanentFailure>,
    /// Entries held back because another entry has the same path
    pub conflicts: Vec<PathConflict>,
    /// Bytes fetched from the remote during this run
    pub bytes_transferred: u64,
    /// Verified bytes across every record after the run
    pub bytes_completed_total: u64,
    /// The run was stopped before every task finished
    pub cancelled: bool,
    /// At least one file failed because the credentials expired
    pub auth_expired: bool,
}

impl SyncReport {
    pub(crate) fn new(run_id: RunId, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            outcomes: Vec::new(),
            counts: OutcomeCounts::default(),
            failures: Vec::new(),
            orphans: Vec::new(),
            permanently_failed: Vec::new(),
            conflicts: Vec::new(),
            bytes_transferred: 0,
            bytes_completed_total: 0,
            cancelled: false,
            auth_expired: false,
        }
    }

    pub(crate) fn record(&mut self, outcome: FileOutcome) {
        self.counts.add(outcome.status);
        self.bytes_transferred += outcome.bytes_transferred;
        if let Some(error) = &outcome.error {
            if outcome.status == TaskStatus::Failed {
                if error.kind == ErrorKind::AuthExpired {
                    self.auth_expired = true;
                }
                self.failures.push(FailureEntry {
                    id: outcome.id.clone(),
                    path: outcome.path.clone(),
                    kind: error.kind,
                    message: error.message.clone(),
                });
            }
        }
        if outcome.status == TaskStatus::Cancelled {
            self.cancelled = true;
        }
        self.outcomes.push(outcome);
    }

    /// Outcome for a given remote id, if it was part of this run
    pub fn outcome(&self, id: &RemoteId) -> Option<&FileOutcome> {
        self.outcomes.iter().find(|o| &o.id == id)
    }

    /// Whether every task completed (or was filtered) with no failure
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.counts.failed == 0
    }
}
