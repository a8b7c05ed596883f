//! Sync tasks and their priority order

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::newtypes::RemoteId;
use super::remote_entry::RemoteEntry;

/// What the diff concluded about one remote entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// No record exists yet
    New,
    /// Content changed, or earlier work is unfinished
    Modified,
    /// Already complete with identical content
    Unchanged,
    /// Record has no counterpart in the snapshot (orphan)
    Deleted,
}

impl Decision {
    pub fn name(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Modified => "modified",
            Self::Unchanged => "unchanged",
            Self::Deleted => "deleted",
        }
    }

    /// Whether a task with this decision moves bytes
    pub fn needs_transfer(&self) -> bool {
        matches!(self, Self::New | Self::Modified)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ephemeral unit of work produced by the diff engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTask {
    pub entry: RemoteEntry,
    pub decision: Decision,
}

impl SyncTask {
    pub fn new(entry: RemoteEntry, decision: Decision) -> Self {
        Self { entry, decision }
    }

    pub fn id(&self) -> &RemoteId {
        &self.entry.id
    }

    pub fn is_directory(&self) -> bool {
        self.entry.is_directory
    }

    /// Scheduling order: directories first (parents before children), then
    /// files by ascending size, ties broken by lexical path
    pub fn cmp_priority(&self, other: &Self) -> Ordering {
        match (self.is_directory(), other.is_directory()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => self.entry.path.cmp(&other.entry.path),
            (false, false) => self
                .entry
                .size
                .cmp(&other.entry.size)
                .then_with(|| self.entry.path.cmp(&other.entry.path)),
        }
    }
}

/// Sort tasks into scheduling order
pub fn sort_by_priority(tasks: &mut [SyncTask]) {
    tasks.sort_by(SyncTask::cmp_priority);
}
