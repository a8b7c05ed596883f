//! Diff engine
//!
//! Compares a remote snapshot against the persisted sync records and decides
//! what work a run has to do. The diff is read-only: it never writes records.
//! Identity updates for renamed or changed entries are applied by the
//! download manager when the task actually runs.
//!
//! ## Decisions
//!
//! | Record                                         | Outcome                         |
//! |------------------------------------------------|---------------------------------|
//! | none                                           | `New` task                      |
//! | size or checksum differs                       | `Modified` task                 |
//! | path differs (rename)                          | `Modified` task                 |
//! | `Complete`, local copy intact                  | unchanged, not emitted          |
//! | `Complete`, local copy missing or wrong length | `Modified` task                 |
//! | `Pending` / `Skipped`                          | `Modified` task                 |
//! | `Failed` / `InProgress` below the ceiling      | `Modified` task                 |
//! | `Failed` / `InProgress` at the ceiling         | permanent failure, not emitted  |
//! | no snapshot entry                              | orphan (`Deleted`)              |
//!
//! Accepted entries that share a path with another accepted entry are held
//! back as [`PathConflict`]s whatever their records say: two writers on one
//! local file would interleave chunks.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use cloudmirror_core::domain::{
    sort_by_priority, Decision, LastError, LocalState, RelativePath, RemoteEntry, RemoteId,
    SyncFilter, SyncRecord, SyncTask,
};

/// A record whose remote entry no longer exists
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Orphan {
    /// Identity as last recorded locally
    pub entry: RemoteEntry,
    pub state: LocalState,
}

impl Orphan {
    /// The orphan expressed as a `Deleted` task
    pub fn as_task(&self) -> SyncTask {
        SyncTask::new(self.entry.clone(), Decision::Deleted)
    }
}

/// An entry excluded from further attempts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermanentFailure {
    pub entry: RemoteEntry,
    pub failure_count: u32,
    pub last_error: Option<LastError>,
}

/// Live entries that map to the same local path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathConflict {
    pub path: RelativePath,
    /// Every entry claiming `path`, in snapshot order
    pub entries: Vec<RemoteEntry>,
}

/// Output of the diff: what a run should do
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncPlan {
    /// New and Modified work in scheduling order, directories first
    pub tasks: Vec<SyncTask>,
    /// Records with no remote counterpart, ordered by path
    pub orphans: Vec<Orphan>,
    /// Entries that reached the failure ceiling
    pub permanently_failed: Vec<PermanentFailure>,
    /// Entries rejected by the caller's filter
    pub filtered: Vec<RemoteEntry>,
    /// Entries not scheduled because another entry has the same path
    pub conflicts: Vec<PathConflict>,
    /// Number of entries already complete and intact
    pub unchanged: usize,
}

impl SyncPlan {
    /// Whether the plan contains any transfer work
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Remote bytes covered by the planned file tasks
    pub fn total_bytes(&self) -> u64 {
        self.tasks
            .iter()
            .filter(|t| !t.is_directory())
            .map(|t| t.entry.size)
            .sum()
    }

    /// Number of tasks per decision
    pub fn count(&self, decision: Decision) -> usize {
        self.tasks.iter().filter(|t| t.decision == decision).count()
    }
}

/// Snapshot vs. record comparison
#[derive(Debug, Clone)]
pub struct DiffEngine {
    retry_ceiling: u32,
}

impl DiffEngine {
    /// `retry_ceiling` is the number of failed runs after which a file is
    /// no longer attempted unless its content changes
    pub fn new(retry_ceiling: u32) -> Self {
        Self {
            retry_ceiling: retry_ceiling.max(1),
        }
    }

    pub fn retry_ceiling(&self) -> u32 {
        self.retry_ceiling
    }

    /// Build the plan for `snapshot`
    ///
    /// `local_intact` reports whether the local copy of a `Complete` record
    /// is still present with the recorded length.
    pub fn plan<F>(
        &self,
        snapshot: Vec<RemoteEntry>,
        records: Vec<SyncRecord>,
        filter: &SyncFilter,
        local_intact: F,
    ) -> SyncPlan
    where
        F: Fn(&SyncRecord) -> bool,
    {
        let snapshot = dedup_by_id(snapshot);
        let seen: HashSet<RemoteId> = snapshot.iter().map(|e| e.id.clone()).collect();
        let mut records: HashMap<RemoteId, SyncRecord> = records
            .into_iter()
            .map(|r| (r.id().clone(), r))
            .collect();

        let mut plan = SyncPlan::default();
        let (accepted, filtered): (Vec<RemoteEntry>, Vec<RemoteEntry>) =
            snapshot.into_iter().partition(|e| filter.accepts(e));
        for entry in &filtered {
            debug!(path = %entry.path, "Excluded by filter");
        }
        plan.filtered = filtered;
        let (accepted, conflicts) = split_path_conflicts(accepted);
        plan.conflicts = conflicts;

        for entry in accepted {

            let Some(record) = records.remove(&entry.id) else {
                plan.tasks.push(SyncTask::new(entry, Decision::New));
                continue;
            };

            if entry.content_differs(record.size(), record.checksum()) {
                debug!(path = %entry.path, "Remote content changed");
                plan.tasks.push(SyncTask::new(entry, Decision::Modified));
                continue;
            }
            if &entry.path != record.path() {
                debug!(from = %record.path(), to = %entry.path, "Remote entry renamed");
                plan.tasks.push(SyncTask::new(entry, Decision::Modified));
                continue;
            }

            match record.state() {
                LocalState::Complete => {
                    if local_intact(&record) {
                        plan.unchanged += 1;
                    } else {
                        debug!(path = %entry.path, "Local copy lost, scheduling re-download");
                        plan.tasks.push(SyncTask::new(entry, Decision::Modified));
                    }
                }
                LocalState::Pending | LocalState::Skipped => {
                    plan.tasks.push(SyncTask::new(entry, Decision::Modified));
                }
                LocalState::Failed | LocalState::InProgress => {
                    if record.failure_count() >= self.retry_ceiling {
                        debug!(
                            path = %entry.path,
                            failures = record.failure_count(),
                            "Retry ceiling reached"
                        );
                        plan.permanently_failed.push(PermanentFailure {
                            entry,
                            failure_count: record.failure_count(),
                            last_error: record.last_error().cloned(),
                        });
                    } else {
                        plan.tasks.push(SyncTask::new(entry, Decision::Modified));
                    }
                }
            }
        }

        // Whatever is left has no counterpart in the snapshot
        plan.orphans = records
            .into_values()
            .filter(|r| !seen.contains(r.id()))
            .map(|r| Orphan {
                entry: r.to_entry(),
                state: r.state(),
            })
            .collect();
        plan.orphans.sort_by(|a, b| a.entry.path.cmp(&b.entry.path));

        sort_by_priority(&mut plan.tasks);
        plan
    }
}

/// Separate entries whose path is claimed by more than one id
fn split_path_conflicts(entries: Vec<RemoteEntry>) -> (Vec<RemoteEntry>, Vec<PathConflict>) {
    let mut claims: HashMap<RelativePath, usize> = HashMap::with_capacity(entries.len());
    for entry in &entries {
        *claims.entry(entry.path.clone()).or_insert(0) += 1;
    }

    let mut unique = Vec::with_capacity(entries.len());
    let mut conflicts: BTreeMap<RelativePath, Vec<RemoteEntry>> = BTreeMap::new();
    for entry in entries {
        if claims[&entry.path] > 1 {
            warn!(
                path = %entry.path,
                id = %entry.id,
                "Path claimed by several entries, not scheduling"
            );
            conflicts.entry(entry.path.clone()).or_default().push(entry);
        } else {
            unique.push(entry);
        }
    }

    let conflicts = conflicts
        .into_iter()
        .map(|(path, entries)| PathConflict { path, entries })
        .collect();
    (unique, conflicts)
}

/// Keep the last observation of every id, preserving first-seen order
fn dedup_by_id(snapshot: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
    let mut position: HashMap<RemoteId, usize> = HashMap::with_capacity(snapshot.len());
    let mut unique: Vec<RemoteEntry> = Vec::with_capacity(snapshot.len());
    for entry in snapshot {
        match position.get(&entry.id) {
            Some(&index) => {
                debug!(id = %entry.id, "Duplicate id in snapshot, keeping the latest");
                unique[index] = entry;
            }
            None => {
                position.insert(entry.id.clone(), unique.len());
                unique.push(entry);
            }
        }
    }
    unique
}
