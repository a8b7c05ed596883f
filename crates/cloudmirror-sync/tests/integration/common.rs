//! Shared helpers for sync engine integration tests
//!
//! Provides an in-memory remote with scripted faults, a progress store
//! wrapper that remembers every saved attempt count, and a harness that
//! wires both into a `SyncEngine` over a scratch directory.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures_util::stream::{self, StreamExt};
use tempfile::TempDir;

use cloudmirror_cache::{DatabasePool, SqliteProgressStore};
use cloudmirror_core::domain::{RemoteEntry, RemoteId, SyncFilter, SyncRecord, TransferError};
use cloudmirror_core::ports::{
    AccessToken, ByteRange, ByteStream, ErrorLogEntry, IContentFetcher, ICredentialProvider,
    IProgressStore, RecordFilter, StateCounts, StaticCredentials,
};
use cloudmirror_sync::filesystem::md5_hex;
use cloudmirror_sync::{CancelHandle, EngineSettings, RunOptions, SyncEngine, SyncReport};

/// Chunk size used by every harness, small enough to make many chunks
pub const CHUNK: u64 = 4;

// ============================================================================
// Scripted remote
// ============================================================================

/// What the next fetch of an object does
#[derive(Debug, Clone)]
pub enum Fault {
    /// Serve the range normally
    Pass,
    /// Fail before any byte is sent
    Fail(TransferError),
    /// Send one byte less than requested
    Truncate,
    /// Serve the range with every byte flipped
    Corrupt,
}

#[derive(Default)]
struct RemoteState {
    contents: HashMap<RemoteId, Vec<u8>>,
    faults: HashMap<RemoteId, VecDeque<Fault>>,
    fetched: Vec<(RemoteId, ByteRange)>,
    in_flight: HashMap<RemoteId, usize>,
    max_in_flight: HashMap<RemoteId, usize>,
    cancel_at: Option<(usize, CancelHandle)>,
}

/// In-memory object store implementing the content-fetch port
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    fetches: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store `content` under `id` and return its listing entry
    pub fn put(&self, id: &str, path: &str, content: &[u8]) -> RemoteEntry {
        let entry = RemoteEntry::file(
            id.parse().unwrap(),
            path.parse().unwrap(),
            content.len() as u64,
            Some(md5_hex(content).parse().unwrap()),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        );
        self.lock()
            .contents
            .insert(entry.id.clone(), content.to_vec());
        entry
    }

    /// Queue faults for the next fetches of `id`, in order
    pub fn script(&self, id: &str, faults: impl IntoIterator<Item = Fault>) {
        self.lock()
            .faults
            .entry(id.parse().unwrap())
            .or_default()
            .extend(faults);
    }

    /// Cancel the run through `handle` while serving the `n`th fetch
    pub fn cancel_on_fetch(&self, n: usize, handle: CancelHandle) {
        self.lock().cancel_at = Some((n, handle));
    }

    /// Hold every fetch open for `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Start offsets fetched for `id`, in request order
    pub fn fetched_offsets(&self, id: &str) -> Vec<u64> {
        let id: RemoteId = id.parse().unwrap();
        self.lock()
            .fetched
            .iter()
            .filter(|(fetched, _)| *fetched == id)
            .map(|(_, range)| range.start)
            .collect()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn clear_log(&self) {
        self.lock().fetched.clear();
    }

    /// Highest number of simultaneous fetches observed for `id`
    pub fn max_in_flight(&self, id: &str) -> usize {
        let id: RemoteId = id.parse().unwrap();
        self.lock().max_in_flight.get(&id).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl IContentFetcher for MemoryRemote {
    async fn fetch(
        &self,
        id: &RemoteId,
        range: ByteRange,
        _token: &AccessToken,
    ) -> Result<ByteStream, TransferError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let (data, fault) = {
            let mut state = self.lock();
            state.fetched.push((id.clone(), range));
            if let Some((at, handle)) = &state.cancel_at {
                if *at == n {
                    handle.cancel();
                }
            }
            let in_flight = {
                let count = state.in_flight.entry(id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            let max = state.max_in_flight.entry(id.clone()).or_insert(0);
            *max = (*max).max(in_flight);

            let fault = state
                .faults
                .get_mut(id)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Fault::Pass);
            (state.contents.get(id).cloned(), fault)
        };

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        *self.lock().in_flight.entry(id.clone()).or_insert(1) -= 1;

        let Some(data) = data else {
            return Err(TransferError::NotFound(id.to_string()));
        };
        let start = range.start as usize;
        let end = (range.end as usize).min(data.len());
        let mut slice = data[start..end].to_vec();

        match fault {
            Fault::Pass => {}
            Fault::Fail(error) => return Err(error),
            Fault::Truncate => {
                slice.pop();
            }
            Fault::Corrupt => slice.iter_mut().for_each(|b| *b = !*b),
        }

        // Several stream items per range
        let pieces: Vec<Result<Bytes, TransferError>> = slice
            .chunks(3)
            .map(|piece| Ok(Bytes::copy_from_slice(piece)))
            .collect();
        Ok(stream::iter(pieces).boxed())
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Provider whose token has always expired
pub struct ExpiredCredentials;

#[async_trait]
impl ICredentialProvider for ExpiredCredentials {
    async fn get_token(&self) -> Result<AccessToken, TransferError> {
        Err(TransferError::AuthExpired)
    }
}

// ============================================================================
// Recording store
// ============================================================================

/// Progress store that remembers the attempt count of every save
pub struct RecordingStore {
    inner: SqliteProgressStore,
    attempts: Mutex<Vec<(RemoteId, u32)>>,
}

impl RecordingStore {
    /// Every attempt count saved for `id`, in save order
    pub fn attempt_history(&self, id: &str) -> Vec<u32> {
        let id: RemoteId = id.parse().unwrap();
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(saved, _)| *saved == id)
            .map(|(_, attempt)| *attempt)
            .collect()
    }

    pub async fn record(&self, id: &str) -> SyncRecord {
        self.inner
            .get_record(&id.parse().unwrap())
            .await
            .unwrap()
            .expect("record should exist")
    }
}

#[async_trait]
impl IProgressStore for RecordingStore {
    async fn save_record(&self, record: &SyncRecord) -> anyhow::Result<()> {
        self.attempts
            .lock()
            .unwrap()
            .push((record.id().clone(), record.attempt_count()));
        self.inner.save_record(record).await
    }

    async fn get_record(&self, id: &RemoteId) -> anyhow::Result<Option<SyncRecord>> {
        self.inner.get_record(id).await
    }

    async fn list_records(&self, filter: &RecordFilter) -> anyhow::Result<Vec<SyncRecord>> {
        self.inner.list_records(filter).await
    }

    async fn delete_record(&self, id: &RemoteId) -> anyhow::Result<()> {
        self.inner.delete_record(id).await
    }

    async fn count_by_state(&self) -> anyhow::Result<StateCounts> {
        self.inner.count_by_state().await
    }

    async fn record_error(&self, entry: &ErrorLogEntry) -> anyhow::Result<()> {
        self.inner.record_error(entry).await
    }

    async fn list_errors(&self, limit: u32) -> anyhow::Result<Vec<ErrorLogEntry>> {
        self.inner.list_errors(limit).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub root: TempDir,
    pub remote: Arc<MemoryRemote>,
    pub store: Arc<RecordingStore>,
    pub engine: SyncEngine,
}

/// Engine settings with tiny chunks and near-instant backoff
pub fn fast_settings(root: &TempDir) -> EngineSettings {
    let mut settings = EngineSettings::new(root.path());
    settings.transfer.chunk_size = CHUNK;
    settings.retry.base_delay = Duration::from_millis(1);
    settings.retry.max_delay = Duration::from_millis(5);
    settings.retry.jitter = false;
    settings
}

pub async fn harness() -> Harness {
    let root = TempDir::new().unwrap();
    let settings = fast_settings(&root);
    harness_with(root, settings, Arc::new(StaticCredentials::new("token"))).await
}

pub async fn harness_with(
    root: TempDir,
    settings: EngineSettings,
    credentials: Arc<dyn ICredentialProvider>,
) -> Harness {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let store = Arc::new(RecordingStore {
        inner: SqliteProgressStore::new(pool.pool().clone()),
        attempts: Mutex::new(Vec::new()),
    });
    let remote = MemoryRemote::new();
    let engine = SyncEngine::new(store.clone(), remote.clone(), credentials, settings);
    Harness {
        root,
        remote,
        store,
        engine,
    }
}

impl Harness {
    /// Plan `snapshot` without filters and run it
    pub async fn sync(&self, snapshot: &[RemoteEntry]) -> SyncReport {
        self.sync_with(snapshot, &SyncFilter::new(), RunOptions::default())
            .await
    }

    pub async fn sync_with(
        &self,
        snapshot: &[RemoteEntry],
        filter: &SyncFilter,
        options: RunOptions,
    ) -> SyncReport {
        let plan = self
            .engine
            .plan_sync(snapshot.to_vec(), filter)
            .await
            .expect("plan should succeed");
        self.engine
            .run_sync(&plan, options)
            .await
            .expect("run should succeed")
    }

    /// Contents of a mirrored file
    pub fn local(&self, path: &str) -> Vec<u8> {
        std::fs::read(self.root.path().join(path)).unwrap()
    }
}

/// Deterministic content of `len` bytes
pub fn content(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Offsets of every chunk at or after `from` in a file of `size` bytes
pub fn offsets(from: u64, size: u64) -> Vec<u64> {
    (from..size).step_by(CHUNK as usize).collect()
}

/// Status reported for `id`
pub fn status(report: &SyncReport, id: &str) -> cloudmirror_sync::TaskStatus {
    report
        .outcome(&id.parse().unwrap())
        .unwrap_or_else(|| panic!("no outcome for {id}"))
        .status
}
