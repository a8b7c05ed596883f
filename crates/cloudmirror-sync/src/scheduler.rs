//! Bounded-concurrency scheduler
//!
//! ## Phases
//!
//! 1. **Directories** run one at a time in plan order (parents before
//!    children), so every parent path exists before any file write.
//! 2. **Files** are admitted in plan order while a [`Semaphore`] permit is
//!    free. Each admitted task first claims its id in the
//!    [`FileLockRegistry`]; a task whose id is busy is deferred and retried
//!    after the next completion instead of running concurrently.
//!
//! ## Pause and cancellation
//!
//! While paused no new task is admitted and in-flight managers hold at their
//! next chunk boundary. Once the token is cancelled no new task is admitted.
//! In-flight managers finish their current chunk and report `Cancelled`;
//! tasks that were never admitted are reported `Cancelled` as well.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use cloudmirror_core::domain::{ErrorKind, LastError, SyncTask};

use crate::download::ChunkedDownloadManager;
use crate::locks::{FileLockGuard, FileLockRegistry};
use crate::pause::PauseGate;
use crate::report::{FileOutcome, SyncReport, TaskStatus};

/// Drives a plan's tasks through download managers
pub struct Scheduler {
    manager: Arc<ChunkedDownloadManager>,
    locks: Arc<FileLockRegistry>,
    cancel: CancellationToken,
    pause: PauseGate,
    concurrency: usize,
}

impl Scheduler {
    pub fn new(
        manager: Arc<ChunkedDownloadManager>,
        locks: Arc<FileLockRegistry>,
        cancel: CancellationToken,
        concurrency: usize,
    ) -> Self {
        Self {
            manager,
            locks,
            cancel,
            pause: PauseGate::default(),
            concurrency: concurrency.max(1),
        }
    }

    /// Hold admission while `pause` is set
    pub fn with_pause(mut self, pause: PauseGate) -> Self {
        self.pause = pause;
        self
    }

    /// Run every task to exactly one outcome, recorded in `report`
    pub async fn run(&self, tasks: &[SyncTask], report: &mut SyncReport) {
        let (dirs, files): (Vec<&SyncTask>, Vec<&SyncTask>) =
            tasks.iter().partition(|t| t.is_directory());

        info!(
            directories = dirs.len(),
            files = files.len(),
            concurrency = self.concurrency,
            "Scheduling tasks"
        );

        self.run_directories(dirs, report).await;
        self.run_files(files.into_iter().cloned().collect(), report).await;
    }

    async fn run_directories(&self, dirs: Vec<&SyncTask>, report: &mut SyncReport) {
        for task in dirs {
            if self.cancel.is_cancelled() || !self.pause.wait(&self.cancel).await {
                report.record(cancelled(task));
                continue;
            }
            let guard = tokio::select! {
                guard = self.locks.claim(task.id()) => guard,
                _ = self.cancel.cancelled() => {
                    report.record(cancelled(task));
                    continue;
                }
            };
            let outcome = self.manager.run(task).await;
            drop(guard);
            report.record(outcome);
        }
    }

    async fn run_files(&self, files: Vec<SyncTask>, report: &mut SyncReport) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut pending: VecDeque<SyncTask> = files.into();
        let mut deferred: Vec<SyncTask> = Vec::new();
        let mut workers: JoinSet<FileOutcome> = JoinSet::new();

        'admission: loop {
            while let Some(task) = pending.pop_front() {
                if self.cancel.is_cancelled() || !self.pause.wait(&self.cancel).await {
                    pending.push_front(task);
                    break 'admission;
                }
                let Some(guard) = self.locks.try_claim(task.id()) else {
                    debug!(id = %task.id(), "File busy, deferring");
                    deferred.push(task);
                    continue;
                };
                let permit = tokio::select! {
                    permit = Arc::clone(&semaphore).acquire_owned() => permit,
                    _ = self.cancel.cancelled() => {
                        pending.push_front(task);
                        break 'admission;
                    }
                };
                match permit {
                    Ok(permit) => self.spawn_worker(&mut workers, task, guard, permit),
                    Err(_) => {
                        pending.push_front(task);
                        break 'admission;
                    }
                }
            }

            match workers.join_next().await {
                Some(joined) => {
                    if let Some(outcome) = joined_outcome(joined) {
                        report.record(outcome);
                    }
                    // Busy ids may have been released by that completion
                    pending.extend(deferred.drain(..));
                }
                None if deferred.is_empty() => break,
                None => {
                    // Nothing of ours in flight: the holder is outside this run
                    let task = deferred.remove(0);
                    let guard = tokio::select! {
                        guard = self.locks.claim(task.id()) => guard,
                        _ = self.cancel.cancelled() => {
                            deferred.insert(0, task);
                            break;
                        }
                    };
                    match Arc::clone(&semaphore).acquire_owned().await {
                        Ok(permit) => self.spawn_worker(&mut workers, task, guard, permit),
                        Err(_) => {
                            deferred.insert(0, task);
                            break;
                        }
                    }
                    pending.extend(deferred.drain(..));
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Some(outcome) = joined_outcome(joined) {
                report.record(outcome);
            }
        }
        for task in pending.iter().chain(deferred.iter()) {
            report.record(cancelled(task));
        }
    }

    fn spawn_worker(
        &self,
        workers: &mut JoinSet<FileOutcome>,
        task: SyncTask,
        guard: FileLockGuard,
        permit: OwnedSemaphorePermit,
    ) {
        let manager = Arc::clone(&self.manager);
        workers.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            match AssertUnwindSafe(manager.run(&task)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(id = %task.id(), "Transfer task panicked");
                    outcome_for(&task, TaskStatus::Failed).with_error(LastError::new(
                        ErrorKind::LocalIo,
                        "transfer task panicked",
                    ))
                }
            }
        });
    }
}

fn outcome_for(task: &SyncTask, status: TaskStatus) -> FileOutcome {
    FileOutcome::new(
        task.id().clone(),
        task.entry.path.clone(),
        task.is_directory(),
        status,
    )
}

fn cancelled(task: &SyncTask) -> FileOutcome {
    outcome_for(task, TaskStatus::Cancelled)
}

/// Workers catch their own panics and are never aborted, so a join error
/// only happens while the runtime shuts down
fn joined_outcome(joined: Result<FileOutcome, JoinError>) -> Option<FileOutcome> {
    match joined {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!(error = %e, "Transfer worker ended abnormally");
            None
        }
    }
}
