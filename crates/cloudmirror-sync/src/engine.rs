//! Sync engine facade
//!
//! The [`SyncEngine`] is what the control layer talks to. It owns no
//! configuration singleton: everything a run needs arrives through
//! [`EngineSettings`] at construction and [`RunOptions`] per call.
//!
//! ## Run Flow
//!
//! 1. **Scan** (optional): list the remote tree through an [`IRemoteLister`]
//! 2. **Plan**: diff the snapshot against every stored record (read-only)
//! 3. **Run**: schedule the plan's tasks and collect a [`SyncReport`]
//!
//! A run may be interrupted with [`SyncEngine::cancel`] or a
//! [`CancelHandle`]; the next run resumes from the persisted chunk bitmaps.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use cloudmirror_core::config::Config;
use cloudmirror_core::domain::{
    LocalState, RelativePath, RemoteEntry, RemoteId, RunId, SyncFilter, SyncRecord,
};
use cloudmirror_core::ports::{
    IContentFetcher, ICredentialProvider, IProgressStore, IRemoteLister, ListingError,
    RecordFilter, StateCounts,
};

use crate::bandwidth::{BandwidthCap, BandwidthLimiter};
use crate::diff::{DiffEngine, Orphan, SyncPlan};
use crate::download::{ChunkedDownloadManager, TransferContext, TransferSettings};
use crate::filesystem::LocalTarget;
use crate::locks::FileLockRegistry;
use crate::pause::PauseGate;
use crate::report::{FileOutcome, SyncReport, TaskStatus};
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::SyncError;

// ============================================================================
// Settings
// ============================================================================

/// Engine-wide settings, fixed for the engine's lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Local directory the remote tree is mirrored into
    pub root: PathBuf,
    pub transfer: TransferSettings,
    pub retry: RetryPolicy,
    /// Failed runs after which a file is reported as permanently failed
    pub max_file_failures: u32,
}

impl EngineSettings {
    /// Settings with default transfer and retry values
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let mut settings = Self::from_config(&Config::default());
        settings.root = root.into();
        settings
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.sync.root.clone(),
            transfer: TransferSettings::from_config(config),
            retry: RetryPolicy::from_config(&config.retry),
            max_file_failures: config.transfer.max_file_failures.max(1),
        }
    }
}

/// Per-run options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Files transferred concurrently
    pub concurrency: usize,
    /// Aggregate throughput cap for the run
    pub bandwidth: BandwidthCap,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.transfer.concurrency.max(1),
            bandwidth: BandwidthCap::from_kbps(
                config.bandwidth.limit_kbps,
                config.bandwidth.burst_kb,
            ),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_bandwidth(mut self, bandwidth: BandwidthCap) -> Self {
        self.bandwidth = bandwidth;
        self
    }
}

/// Point-in-time view of every stored record
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub records: Vec<SyncRecord>,
    pub counts: StateCounts,
    /// Verified bytes across all file records
    pub bytes_completed: u64,
    /// Total size of all file records
    pub bytes_total: u64,
}

impl ProgressSnapshot {
    fn from_records(records: Vec<SyncRecord>, counts: StateCounts) -> Self {
        let files = records.iter().filter(|r| !r.is_directory());
        let (bytes_completed, bytes_total) = files.fold((0u64, 0u64), |(done, total), r| {
            (done + r.bytes_completed(), total + r.size())
        });
        Self {
            records,
            counts,
            bytes_completed,
            bytes_total,
        }
    }

    /// Fraction of bytes verified, 1.0 when there is nothing to transfer
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            1.0
        } else {
            self.bytes_completed as f64 / self.bytes_total as f64
        }
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cloneable handle that pauses or stops the engine's active run
///
/// Cancelling between runs makes the next run stop immediately. A run that
/// observed the cancellation spends the token; the run after it starts with
/// a fresh one. A pause lasts until [`resume`](Self::resume), across runs.
#[derive(Clone, Default)]
pub struct CancelHandle {
    state: Arc<Mutex<CancelState>>,
    pause: PauseGate,
}

#[derive(Default)]
struct CancelState {
    token: CancellationToken,
    /// A run has already stopped because of `token`
    spent: bool,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.lock().token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().token.is_cancelled()
    }

    /// Hold transfers at their next chunk boundary
    pub fn pause(&self) {
        self.pause.pause();
    }

    pub fn resume(&self) {
        self.pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CancelState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Token for a run that is starting, replacing a spent one
    fn begin_run(&self) -> CancellationToken {
        let mut state = self.lock();
        if state.spent {
            state.token = CancellationToken::new();
            state.spent = false;
        }
        state.token.clone()
    }

    /// Record that the finishing run saw `token` cancelled
    fn end_run(&self, token: &CancellationToken) {
        if token.is_cancelled() {
            self.lock().spent = true;
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .field("paused", &self.is_paused())
            .finish()
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Plans and runs remote-to-local synchronization
pub struct SyncEngine {
    store: Arc<dyn IProgressStore>,
    fetcher: Arc<dyn IContentFetcher>,
    credentials: Arc<dyn ICredentialProvider>,
    lister: Option<Arc<dyn IRemoteLister>>,
    settings: EngineSettings,
    target: LocalTarget,
    locks: Arc<FileLockRegistry>,
    cancel: CancelHandle,
    /// Orphans found by the most recent plan, keyed by id
    known_orphans: Mutex<HashMap<RemoteId, RelativePath>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn IProgressStore>,
        fetcher: Arc<dyn IContentFetcher>,
        credentials: Arc<dyn ICredentialProvider>,
        settings: EngineSettings,
    ) -> Self {
        let target = LocalTarget::new(settings.root.clone());
        Self {
            store,
            fetcher,
            credentials,
            lister: None,
            settings,
            target,
            locks: FileLockRegistry::new(),
            cancel: CancelHandle::default(),
            known_orphans: Mutex::new(HashMap::new()),
        }
    }

    /// Attach the listing capability used by [`scan`](Self::scan)
    pub fn with_lister(mut self, lister: Arc<dyn IRemoteLister>) -> Self {
        self.lister = Some(lister);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// List the remote tree under `root_id`
    #[instrument(skip(self))]
    pub async fn scan(&self, root_id: &str) -> Result<Vec<RemoteEntry>, SyncError> {
        let lister = self.lister.as_ref().ok_or_else(|| {
            ListingError::RemoteUnavailable("no remote listing configured".to_string())
        })?;
        let entries = lister.list_entries(root_id).await?;
        info!(entries = entries.len(), "Remote snapshot listed");
        Ok(entries)
    }

    /// Compare `snapshot` with the stored records and return the work to do
    ///
    /// Only reads the store and local file metadata.
    #[instrument(skip_all, fields(entries = snapshot.len()))]
    pub async fn plan_sync(
        &self,
        snapshot: Vec<RemoteEntry>,
        filter: &SyncFilter,
    ) -> Result<SyncPlan, SyncError> {
        let records = self
            .store
            .list_records(&RecordFilter::new())
            .await
            .map_err(SyncError::Store)?;
        let intact = self.intact_completed(&records).await;

        let diff = DiffEngine::new(self.settings.max_file_failures);
        let plan = diff.plan(snapshot, records, filter, |r| intact.contains(r.id()));

        {
            let mut known = self
                .known_orphans
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *known = plan
                .orphans
                .iter()
                .map(|o| (o.entry.id.clone(), o.entry.path.clone()))
                .collect();
        }

        info!(
            tasks = plan.tasks.len(),
            unchanged = plan.unchanged,
            orphans = plan.orphans.len(),
            permanently_failed = plan.permanently_failed.len(),
            filtered = plan.filtered.len(),
            conflicts = plan.conflicts.len(),
            "Sync planned"
        );
        Ok(plan)
    }

    /// Execute `plan` and report every task's outcome
    ///
    /// Safe to call again with a fresh plan after a failed or cancelled run.
    #[instrument(skip_all, fields(tasks = plan.tasks.len(), concurrency = options.concurrency))]
    pub async fn run_sync(
        &self,
        plan: &SyncPlan,
        options: RunOptions,
    ) -> Result<SyncReport, SyncError> {
        if !self.target.root_available().await {
            return Err(SyncError::RootUnavailable(self.settings.root.clone()));
        }

        let run_id = RunId::new();
        let mut report = SyncReport::new(run_id, Utc::now());
        info!(run_id = %run_id, "Sync run started");

        let cancel = self.cancel.begin_run();
        let ctx = Arc::new(TransferContext {
            store: Arc::clone(&self.store),
            fetcher: Arc::clone(&self.fetcher),
            credentials: Arc::clone(&self.credentials),
            limiter: Arc::new(BandwidthLimiter::new(options.bandwidth)),
            retry: self.settings.retry.clone(),
            settings: self.settings.transfer.clone(),
            target: self.target.clone(),
            cancel: cancel.clone(),
            pause: self.cancel.pause.clone(),
        });
        let manager = Arc::new(ChunkedDownloadManager::new(ctx));
        let scheduler = Scheduler::new(
            manager,
            Arc::clone(&self.locks),
            cancel.clone(),
            options.concurrency,
        )
        .with_pause(self.cancel.pause.clone());

        scheduler.run(&plan.tasks, &mut report).await;
        self.cancel.end_run(&cancel);

        for entry in &plan.filtered {
            report.record(FileOutcome::new(
                entry.id.clone(),
                entry.path.clone(),
                entry.is_directory,
                TaskStatus::SkippedByFilter,
            ));
        }
        report.orphans = plan.orphans.clone();
        report.permanently_failed = plan.permanently_failed.clone();
        report.conflicts = plan.conflicts.clone();

        match self.bytes_completed_total().await {
            Ok(total) => report.bytes_completed_total = total,
            Err(e) => warn!(error = %e, "Could not total completed bytes"),
        }
        report.finished_at = Utc::now();

        info!(
            run_id = %run_id,
            completed = report.counts.completed,
            failed = report.counts.failed,
            skipped = report.counts.skipped_by_filter,
            cancelled = report.counts.cancelled,
            bytes = report.bytes_transferred,
            "Sync run finished"
        );
        Ok(report)
    }

    /// Stop the active run cooperatively
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancel.cancel();
    }

    /// Hold the active run (and later ones) at chunk boundaries
    pub fn pause(&self) {
        info!("Pause requested");
        self.cancel.pause();
    }

    pub fn resume(&self) {
        info!("Resume requested");
        self.cancel.resume();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Snapshot of every stored record
    #[instrument(skip(self))]
    pub async fn get_progress(&self) -> Result<ProgressSnapshot, SyncError> {
        let records = self
            .store
            .list_records(&RecordFilter::new())
            .await
            .map_err(SyncError::Store)?;
        let counts = self.store.count_by_state().await.map_err(SyncError::Store)?;
        Ok(ProgressSnapshot::from_records(records, counts))
    }

    /// Remove the local copy of an orphan and forget its record
    ///
    /// `id` must be an orphan reported by the most recent
    /// [`plan_sync`](Self::plan_sync). When a live entry has since taken over
    /// the same path, only the record is dropped and the file is kept.
    /// Returns whether anything was removed from disk.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn cleanup_orphan(&self, id: &RemoteId) -> Result<bool, SyncError> {
        let path = {
            let known = self
                .known_orphans
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            known.get(id).cloned()
        };
        let Some(path) = path else {
            return Err(SyncError::NotAnOrphan(id.to_string()));
        };

        let _guard = self.locks.claim(id).await;
        let record = self.store.get_record(id).await.map_err(SyncError::Store)?;
        let Some(record) = record else {
            self.forget_orphan(id);
            return Err(SyncError::NotAnOrphan(id.to_string()));
        };
        if record.path() != &path {
            debug!(recorded = %record.path(), planned = %path, "Orphan path changed since planning");
        }

        let removed = match self.live_owner(&record).await? {
            Some(owner) => {
                info!(
                    path = %record.path(),
                    owner = %owner,
                    "Path now belongs to a live entry, keeping local copy"
                );
                false
            }
            None => self.target.remove(record.path()).await?,
        };
        self.store.delete_record(id).await.map_err(SyncError::Store)?;
        self.forget_orphan(id);

        info!(path = %record.path(), removed, "Orphan cleaned up");
        Ok(removed)
    }

    /// Orphans from the most recent plan, deepest paths first
    ///
    /// This is the order in which [`cleanup_orphan`](Self::cleanup_orphan)
    /// can empty directories before removing them.
    pub fn orphan_cleanup_order(orphans: &[Orphan]) -> Vec<&Orphan> {
        let mut ordered: Vec<&Orphan> = orphans.iter().collect();
        ordered.sort_by(|a, b| {
            b.entry
                .path
                .depth()
                .cmp(&a.entry.path.depth())
                .then_with(|| a.entry.path.cmp(&b.entry.path))
        });
        ordered
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn forget_orphan(&self, id: &RemoteId) {
        self.known_orphans
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
    }

    /// Another record at `orphan`'s path that is not itself an orphan
    async fn live_owner(&self, orphan: &SyncRecord) -> Result<Option<RemoteId>, SyncError> {
        let filter = RecordFilter::new().with_path_prefix(orphan.path().clone());
        let sharing = self.store.list_records(&filter).await.map_err(SyncError::Store)?;
        let known = self
            .known_orphans
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(sharing
            .into_iter()
            .find(|r| {
                r.path() == orphan.path() && r.id() != orphan.id() && !known.contains_key(r.id())
            })
            .map(|r| r.id().clone()))
    }

    /// Ids of `Complete` records whose local copy still looks right
    async fn intact_completed(&self, records: &[SyncRecord]) -> HashSet<RemoteId> {
        let mut intact = HashSet::new();
        for record in records.iter().filter(|r| r.state() == LocalState::Complete) {
            let local = self.target.path_for(record.path());
            let ok = match tokio::fs::metadata(&local).await {
                Ok(meta) if record.is_directory() => meta.is_dir(),
                Ok(meta) => meta.is_file() && meta.len() == record.size(),
                Err(_) => false,
            };
            if ok {
                intact.insert(record.id().clone());
            } else {
                debug!(id = %record.id(), path = %record.path(), "Local copy missing or changed");
            }
        }
        intact
    }

    async fn bytes_completed_total(&self) -> anyhow::Result<u64> {
        let filter = RecordFilter::new().with_state(LocalState::Complete);
        let records = self.store.list_records(&filter).await?;
        Ok(records
            .iter()
            .filter(|r| !r.is_directory())
            .map(|r| r.size())
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::TempDir;

    use cloudmirror_cache::{DatabasePool, SqliteProgressStore};
    use cloudmirror_core::domain::TransferError;
    use cloudmirror_core::ports::{ByteRange, ByteStream, StaticCredentials};

    const SUM: &str = "9e107d9d372bb6826bd81d3542a419d6";

    struct NoContent;

    #[async_trait]
    impl IContentFetcher for NoContent {
        async fn fetch(
            &self,
            _id: &RemoteId,
            _range: ByteRange,
            _token: &cloudmirror_core::ports::AccessToken,
        ) -> Result<ByteStream, TransferError> {
            Err(TransferError::NotFound("no content in this test".into()))
        }
    }

    struct FixedListing(Vec<RemoteEntry>);

    #[async_trait]
    impl IRemoteLister for FixedListing {
        async fn list_entries(&self, _root_id: &str) -> Result<Vec<RemoteEntry>, ListingError> {
            Ok(self.0.clone())
        }
    }

    async fn engine(root: &TempDir) -> (SyncEngine, Arc<SqliteProgressStore>) {
        let pool = DatabasePool::in_memory().await.unwrap();
        let store = Arc::new(SqliteProgressStore::new(pool.pool().clone()));
        let engine = SyncEngine::new(
            store.clone(),
            Arc::new(NoContent),
            Arc::new(StaticCredentials::anonymous()),
            EngineSettings::new(root.path()),
        );
        (engine, store)
    }

    fn file(id: &str, path: &str, size: u64) -> RemoteEntry {
        RemoteEntry::file(
            id.parse().unwrap(),
            path.parse().unwrap(),
            size,
            Some(SUM.parse().unwrap()),
            Utc::now(),
        )
    }

    async fn completed(store: &SqliteProgressStore, entry: &RemoteEntry) {
        let mut record = SyncRecord::new(entry, 4);
        record.begin_attempt(Utc::now()).unwrap();
        for chunk in record.chunks() {
            record.mark_chunk_verified(&chunk, "00".into()).unwrap();
        }
        record.complete_verified().unwrap();
        store.save_record(&record).await.unwrap();
    }

    #[test]
    fn test_settings_from_config() {
        let config = cloudmirror_core::config::ConfigBuilder::new()
            .sync_root(PathBuf::from("/srv/mirror"))
            .transfer_max_file_failures(0)
            .transfer_concurrency(0)
            .build();
        let settings = EngineSettings::from_config(&config);
        assert_eq!(settings.root, PathBuf::from("/srv/mirror"));
        assert_eq!(settings.max_file_failures, 1);
        assert_eq!(RunOptions::from_config(&config).concurrency, 1);
    }

    #[test]
    fn test_run_options_defaults() {
        let options = RunOptions::default();
        assert_eq!(options.concurrency, 3);
        assert_eq!(options.bandwidth, BandwidthCap::Unlimited);
        let capped = options.with_bandwidth(BandwidthCap::from_kbps(10, 20));
        assert!(matches!(capped.bandwidth, BandwidthCap::Limited { .. }));
    }

    #[test]
    fn test_cancel_handle_spent_token_is_replaced() {
        let handle = CancelHandle::default();
        let shared = handle.clone();
        shared.cancel();

        let first = handle.begin_run();
        assert!(first.is_cancelled());
        handle.end_run(&first);
        assert!(handle.is_cancelled());

        let second = handle.begin_run();
        assert!(!second.is_cancelled());
        assert!(!shared.is_cancelled());
    }

    #[test]
    fn test_cancel_after_run_carries_to_next_run() {
        let handle = CancelHandle::default();
        let token = handle.begin_run();
        handle.end_run(&token);

        // Arrives once the run has stopped looking at its token
        handle.cancel();
        let next = handle.begin_run();
        assert!(next.is_cancelled());
        handle.end_run(&next);
        assert!(!handle.begin_run().is_cancelled());
    }

    #[tokio::test]
    async fn test_scan_without_lister_fails() {
        let root = TempDir::new().unwrap();
        let (engine, _) = engine(&root).await;
        let err = engine.scan("root").await.unwrap_err();
        assert!(matches!(err, SyncError::Listing(ListingError::RemoteUnavailable(_))));
    }

    #[tokio::test]
    async fn test_scan_returns_listing() {
        let root = TempDir::new().unwrap();
        let (engine, _) = engine(&root).await;
        let engine = engine.with_lister(Arc::new(FixedListing(vec![file("a", "a.txt", 3)])));
        let entries = engine.scan("root").await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_plan_treats_missing_local_copy_as_work() {
        let root = TempDir::new().unwrap();
        let (engine, store) = engine(&root).await;
        let present = file("p", "present.bin", 5);
        let missing = file("m", "missing.bin", 5);
        completed(&store, &present).await;
        completed(&store, &missing).await;
        std::fs::write(root.path().join("present.bin"), b"12345").unwrap();

        let plan = engine
            .plan_sync(vec![present, missing], &SyncFilter::new())
            .await
            .unwrap();
        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].id().as_str(), "m");
    }

    #[tokio::test]
    async fn test_plan_is_read_only() {
        let root = TempDir::new().unwrap();
        let (engine, store) = engine(&root).await;
        let plan = engine
            .plan_sync(vec![file("a", "a.bin", 9)], &SyncFilter::new())
            .await
            .unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert!(store.list_records(&RecordFilter::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_requires_root() {
        let root = TempDir::new().unwrap();
        let (engine, _) = engine(&root).await;
        drop(root);
        let err = engine
            .run_sync(&SyncPlan::default(), RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RootUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cleanup_requires_planned_orphan() {
        let root = TempDir::new().unwrap();
        let (engine, store) = engine(&root).await;
        let gone = file("g", "gone.bin", 4);
        completed(&store, &gone).await;
        std::fs::write(root.path().join("gone.bin"), b"abcd").unwrap();

        let err = engine.cleanup_orphan(&gone.id).await.unwrap_err();
        assert!(matches!(err, SyncError::NotAnOrphan(_)));

        let plan = engine.plan_sync(vec![], &SyncFilter::new()).await.unwrap();
        assert_eq!(plan.orphans.len(), 1);

        assert!(engine.cleanup_orphan(&gone.id).await.unwrap());
        assert!(!root.path().join("gone.bin").exists());
        assert!(store.get_record(&gone.id).await.unwrap().is_none());

        let err = engine.cleanup_orphan(&gone.id).await.unwrap_err();
        assert!(matches!(err, SyncError::NotAnOrphan(_)));
    }

    #[tokio::test]
    async fn test_progress_totals_files_only() {
        let root = TempDir::new().unwrap();
        let (engine, store) = engine(&root).await;
        completed(&store, &file("a", "a.bin", 10)).await;
        store
            .save_record(&SyncRecord::new(&file("b", "b.bin", 6), 4))
            .await
            .unwrap();

        let progress = engine.get_progress().await.unwrap();
        assert_eq!(progress.records.len(), 2);
        assert_eq!(progress.counts.complete, 1);
        assert_eq!(progress.counts.pending, 1);
        assert_eq!(progress.bytes_completed, 10);
        assert_eq!(progress.bytes_total, 16);
    }

    #[test]
    fn test_orphan_cleanup_order_deepest_first() {
        let dir = |id: &str, path: &str| Orphan {
            entry: RemoteEntry::directory(id.parse().unwrap(), path.parse().unwrap(), Utc::now()),
            state: LocalState::Complete,
        };
        let orphans = vec![dir("1", "a"), dir("2", "a/b"), dir("3", "a/b/c"), dir("4", "z")];
        let ordered: Vec<&str> = SyncEngine::orphan_cleanup_order(&orphans)
            .iter()
            .map(|o| o.entry.path.as_str())
            .collect();
        assert_eq!(ordered, vec!["a/b/c", "a/b", "a", "z"]);
    }
}
