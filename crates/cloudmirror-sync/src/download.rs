//! Chunked download manager
//!
//! Drives one file from whatever state its sync record is in to `Complete`
//! or `Failed`.
//!
//! ## Flow
//!
//! ```text
//! load record ──► rebase / chunk-size drift ──► pre-allocate target
//!                                                     │
//!                      re-validate set chunks ◄───────┘
//!                                │
//!                                ▼
//!              ┌──► fetch unset chunks (ascending offset)
//!              │         │  write ─► sync_data ─► mark bit ─► save
//!              │         ▼
//!              │    whole-file verification
//!              │         │
//!   corruption │         ├── match ──► mtime ─► Complete
//!   (retry)    └─────────┤
//!                        └── mismatch, ceiling reached ──► Failed
//! ```
//!
//! Chunk failures go through the [`RetryPolicy`]; a chunk that exhausts its
//! attempts fails the whole file with the last error retained. Cancellation
//! and pauses are observed before each chunk and during backoff, never
//! mid-write.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use cloudmirror_core::config::Config;
use cloudmirror_core::domain::{
    Chunk, DomainError, ErrorKind, LastError, LocalState, RemoteEntry, SyncRecord, SyncTask,
    TransferError,
};
use cloudmirror_core::ports::{
    ByteRange, ErrorLogEntry, IContentFetcher, ICredentialProvider, IProgressStore,
};

use crate::bandwidth::BandwidthLimiter;
use crate::filesystem::{md5_hex, LocalTarget};
use crate::pause::PauseGate;
use crate::report::{FileOutcome, TaskStatus};
use crate::retry::{RetryDecision, RetryPolicy};

/// Per-file transfer knobs, resolved from configuration at call time
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSettings {
    /// Bytes per chunk (the last chunk may be shorter)
    pub chunk_size: u64,
    /// Chunks of one file fetched concurrently
    pub chunk_parallelism: usize,
    /// Deadline for fetching a single chunk
    pub chunk_timeout: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl TransferSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size_bytes().max(1),
            chunk_parallelism: config.transfer.chunk_parallelism.max(1),
            chunk_timeout: Duration::from_secs(config.transfer.chunk_timeout_secs.max(1)),
        }
    }
}

/// Everything a download manager shares with the rest of a run
pub struct TransferContext {
    pub store: Arc<dyn IProgressStore>,
    pub fetcher: Arc<dyn IContentFetcher>,
    pub credentials: Arc<dyn ICredentialProvider>,
    pub limiter: Arc<BandwidthLimiter>,
    pub retry: RetryPolicy,
    pub settings: TransferSettings,
    pub target: LocalTarget,
    pub cancel: CancellationToken,
    pub pause: PauseGate,
}

enum ChunkOutcome {
    Written(u64),
    Skipped,
}

enum FileEnd {
    Complete,
    Cancelled,
}

/// Executes single-file transfers
///
/// The caller must hold the [`FileLockGuard`](crate::locks::FileLockGuard)
/// for the task's id while [`run`](Self::run) is in flight.
pub struct ChunkedDownloadManager {
    ctx: Arc<TransferContext>,
}

impl ChunkedDownloadManager {
    pub fn new(ctx: Arc<TransferContext>) -> Self {
        Self { ctx }
    }

    /// Transfer one task to a terminal outcome
    #[instrument(skip(self, task), fields(id = %task.id(), path = %task.entry.path))]
    pub async fn run(&self, task: &SyncTask) -> FileOutcome {
        let entry = &task.entry;
        let transferred = AtomicU64::new(0);

        let result = match self.load_record(entry).await {
            Ok(record) => {
                let record = Mutex::new(record);
                let result = if entry.is_directory {
                    self.materialize_directory(entry, &record).await
                } else {
                    self.download_file(entry, &record, &transferred).await
                };
                match result {
                    Ok(end) => Ok(end),
                    Err(error) => Err(self.give_up(&record, error).await),
                }
            }
            Err(error) => Err((LastError::new(error.kind(), error.to_string()), 0)),
        };

        let bytes = transferred.load(Ordering::Relaxed);
        let outcome = |status| {
            FileOutcome::new(entry.id.clone(), entry.path.clone(), entry.is_directory, status)
                .with_bytes(bytes)
        };

        match result {
            Ok(FileEnd::Complete) => {
                info!(bytes, "Transfer complete");
                outcome(TaskStatus::Completed)
            }
            Ok(FileEnd::Cancelled) => {
                info!(bytes, "Transfer interrupted by cancellation");
                outcome(TaskStatus::Cancelled)
            }
            Err((error, attempts)) => {
                warn!(kind = %error.kind, error = %error.message, "Transfer failed");
                self.log_failure(entry, &error, attempts).await;
                outcome(TaskStatus::Failed).with_error(error)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Record lifecycle
    // ------------------------------------------------------------------------

    /// Load (or create) the record and bring its identity up to date
    async fn load_record(&self, entry: &RemoteEntry) -> Result<SyncRecord, TransferError> {
        let chunk_size = self.ctx.settings.chunk_size;
        let existing = self
            .ctx
            .store
            .get_record(&entry.id)
            .await
            .map_err(store_error)?;

        let mut record = match existing {
            None => {
                debug!("Created sync record");
                SyncRecord::new(entry, chunk_size)
            }
            Some(mut record) => {
                if record.path() != &entry.path {
                    match self.ctx.target.relocate(record.path(), &entry.path).await {
                        Ok(true) => debug!(from = %record.path(), "Moved local copy after rename"),
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "Could not move local copy after rename"),
                    }
                }
                if record.rebase(entry) {
                    info!("Remote content changed, discarding earlier progress");
                }
                if record.adopt_chunk_size(chunk_size) {
                    info!(chunk_size, "Chunk size changed, discarding earlier progress");
                }
                record
            }
        };

        if matches!(record.state(), LocalState::Complete | LocalState::Skipped) {
            record.reset_to_pending().map_err(invariant)?;
        }
        self.save(&record).await?;
        Ok(record)
    }

    /// Mark the record failed and return what the report should carry
    async fn give_up(&self, record: &Mutex<SyncRecord>, error: TransferError) -> (LastError, u32) {
        let kind = error.kind();
        let last_error = LastError::new(kind, error.to_string());
        let mut record = record.lock().await;

        let counts_toward_ceiling = kind != ErrorKind::AuthExpired;
        if let Err(e) = record.fail(last_error.clone(), counts_toward_ceiling) {
            warn!(error = %e, "Could not mark record failed");
        }
        if let Err(e) = self.save(&record).await {
            warn!(error = %e, "Could not persist failed record");
        }
        (last_error, record.attempt_count())
    }

    async fn log_failure(&self, entry: &RemoteEntry, error: &LastError, attempts: u32) {
        let log_entry = ErrorLogEntry {
            remote_id: entry.id.clone(),
            path: entry.path.clone(),
            kind: error.kind,
            message: error.message.clone(),
            attempt_count: attempts,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.ctx.store.record_error(&log_entry).await {
            warn!(error = %e, "Could not append to the error log");
        }
    }

    async fn save(&self, record: &SyncRecord) -> Result<(), TransferError> {
        self.ctx.store.save_record(record).await.map_err(store_error)
    }

    // ------------------------------------------------------------------------
    // Directories
    // ------------------------------------------------------------------------

    async fn materialize_directory(
        &self,
        entry: &RemoteEntry,
        record: &Mutex<SyncRecord>,
    ) -> Result<FileEnd, TransferError> {
        self.ctx.target.create_directory(&entry.path).await?;
        let mut record = record.lock().await;
        record.begin_attempt(Utc::now()).map_err(invariant)?;
        record.complete_verified().map_err(invariant)?;
        self.save(&record).await?;
        Ok(FileEnd::Complete)
    }

    // ------------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------------

    async fn download_file(
        &self,
        entry: &RemoteEntry,
        record: &Mutex<SyncRecord>,
        transferred: &AtomicU64,
    ) -> Result<FileEnd, TransferError> {
        let target = &self.ctx.target;
        let prior_len = target.file_len(&entry.path).await?;
        let local = target.prepare_file(&entry.path, entry.size).await?;

        {
            let mut record = record.lock().await;
            if record.chunk_bitmap().count_set() > 0 {
                if prior_len == Some(entry.size) {
                    self.revalidate_chunks(&mut record, &local).await?;
                } else {
                    info!(?prior_len, "Local file missing or resized, discarding chunk progress");
                    record.discard_progress();
                }
            }
            record.begin_attempt(Utc::now()).map_err(invariant)?;
            self.save(&record).await?;
        }

        loop {
            let pending = record.lock().await.pending_chunks();
            if !pending.is_empty() {
                debug!(chunks = pending.len(), "Fetching pending chunks");
                let finished = self
                    .transfer_chunks(entry, &local, pending, record, transferred)
                    .await?;
                if !finished {
                    return Ok(FileEnd::Cancelled);
                }
            }

            let Some(mismatch) = self.verify_file(entry, &local).await? else {
                if let Err(e) = target.set_modified_time(&local, entry.modified_time).await {
                    warn!(error = %e, "Could not set modification time");
                }
                let mut record = record.lock().await;
                record.complete_verified().map_err(invariant)?;
                self.save(&record).await?;
                return Ok(FileEnd::Complete);
            };

            let corruption_count = {
                let mut record = record.lock().await;
                let count = record.record_corruption(mismatch.to_string());
                self.save(&record).await?;
                count
            };
            match self
                .ctx
                .retry
                .decide(ErrorKind::ChecksumMismatch, corruption_count, None)
            {
                RetryDecision::Retry(_) => {
                    warn!(corruption_count, error = %mismatch, "Whole-file verification failed, re-downloading");
                }
                RetryDecision::GiveUp => return Err(mismatch),
            }
        }
    }

    /// Re-hash every set chunk against the bytes on disk, clearing mismatches
    async fn revalidate_chunks(
        &self,
        record: &mut SyncRecord,
        local: &Path,
    ) -> Result<(), TransferError> {
        let mut invalid = 0u32;
        for chunk in record.verified_chunks() {
            let stored = record.chunk_digest(chunk.index).map(str::to_owned);
            let on_disk = self.ctx.target.chunk_digest_on_disk(local, &chunk).await.ok();
            if stored.is_none() || stored != on_disk {
                record.invalidate_chunk(chunk.index).map_err(invariant)?;
                invalid += 1;
            }
        }
        if invalid > 0 {
            info!(invalid, "Cleared chunks that failed re-validation");
        } else {
            debug!(
                verified = record.chunk_bitmap().count_set(),
                "Chunk progress re-validated"
            );
        }
        Ok(())
    }

    /// Fetch `pending` chunks; returns `false` if cancellation stopped the file early
    async fn transfer_chunks(
        &self,
        entry: &RemoteEntry,
        local: &Path,
        pending: Vec<Chunk>,
        record: &Mutex<SyncRecord>,
        transferred: &AtomicU64,
    ) -> Result<bool, TransferError> {
        // Stops the remaining chunks of this file on the first hard failure
        let stop = self.ctx.cancel.child_token();
        let parallelism = self.ctx.settings.chunk_parallelism.max(1);

        let mut results = stream::iter(pending)
            .map(|chunk| {
                let stop = &stop;
                async move {
                    let result = self.transfer_chunk(entry, local, chunk, record, stop).await;
                    if result.is_err() {
                        stop.cancel();
                    }
                    result
                }
            })
            .buffer_unordered(parallelism);

        let mut first_error = None;
        let mut skipped = false;
        while let Some(result) = results.next().await {
            match result {
                Ok(ChunkOutcome::Written(bytes)) => {
                    transferred.fetch_add(bytes, Ordering::Relaxed);
                }
                Ok(ChunkOutcome::Skipped) => skipped = true,
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(!skipped),
        }
    }

    /// One chunk, with retries
    async fn transfer_chunk(
        &self,
        entry: &RemoteEntry,
        local: &Path,
        chunk: Chunk,
        record: &Mutex<SyncRecord>,
        stop: &CancellationToken,
    ) -> Result<ChunkOutcome, TransferError> {
        let mut attempt: u32 = 0;
        loop {
            if stop.is_cancelled() || !self.ctx.pause.wait(stop).await {
                return Ok(ChunkOutcome::Skipped);
            }
            attempt += 1;

            match self.fetch_chunk(entry, &chunk).await {
                Ok(data) => {
                    // write-then-mark: bytes are on stable storage before the bit is set
                    self.ctx.target.write_chunk(local, chunk.offset, &data).await?;
                    let digest = md5_hex(&data);

                    let mut record = record.lock().await;
                    if attempt > 1 {
                        record.record_chunk_attempt(attempt, None);
                    }
                    record.mark_chunk_verified(&chunk, digest).map_err(invariant)?;
                    self.save(&record).await?;
                    trace!(chunk = chunk.index, attempt, "Chunk verified");
                    return Ok(ChunkOutcome::Written(chunk.length));
                }
                Err(error) => {
                    let kind = error.kind();
                    {
                        let mut record = record.lock().await;
                        record.record_chunk_attempt(
                            attempt,
                            Some(LastError::new(kind, error.to_string())),
                        );
                        self.save(&record).await?;
                    }

                    match self.ctx.retry.decide(kind, attempt, error.retry_after()) {
                        RetryDecision::Retry(delay) => {
                            warn!(
                                chunk = chunk.index,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "Chunk fetch failed, retrying"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = stop.cancelled() => return Ok(ChunkOutcome::Skipped),
                            }
                        }
                        RetryDecision::GiveUp => {
                            debug!(chunk = chunk.index, attempt, kind = %kind, "Giving up on chunk");
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    /// Fetch one chunk into memory under the chunk deadline
    ///
    /// The deadline covers network I/O only: time spent waiting for
    /// bandwidth tokens pushes it back by the same amount.
    async fn fetch_chunk(&self, entry: &RemoteEntry, chunk: &Chunk) -> Result<Vec<u8>, TransferError> {
        let token = self.ctx.credentials.get_token().await?;
        let range = ByteRange::from(chunk);
        let expected = usize::try_from(chunk.length).map_err(|_| {
            TransferError::LocalIo(format!("chunk of {} bytes does not fit in memory", chunk.length))
        })?;

        let timeout = self.ctx.settings.chunk_timeout;
        let timed_out = |_| {
            TransferError::Transient(format!(
                "fetch of {range} timed out after {}s",
                timeout.as_secs()
            ))
        };
        let mut deadline = Instant::now() + timeout;

        let mut stream = timeout_at(deadline, self.ctx.fetcher.fetch(&entry.id, range, &token))
            .await
            .map_err(timed_out)??;
        let mut buf = Vec::with_capacity(expected);
        while let Some(item) = timeout_at(deadline, stream.next()).await.map_err(timed_out)? {
            let bytes = item?;
            if buf.len() + bytes.len() > expected {
                return Err(TransferError::Transient(format!(
                    "stream for {range} returned more than {expected} bytes"
                )));
            }
            let throttled = Instant::now();
            self.ctx.limiter.acquire(bytes.len() as u64).await;
            deadline += throttled.elapsed();
            buf.extend_from_slice(&bytes);
        }
        if buf.len() < expected {
            return Err(TransferError::Transient(format!(
                "short read for {range}: got {} of {expected} bytes",
                buf.len()
            )));
        }
        Ok(buf)
    }

    /// `None` when the local file matches the remote identity
    async fn verify_file(
        &self,
        entry: &RemoteEntry,
        local: &Path,
    ) -> Result<Option<TransferError>, TransferError> {
        match &entry.checksum {
            Some(expected) => {
                let actual = self.ctx.target.file_md5(local).await?;
                if actual == expected.as_str() {
                    Ok(None)
                } else {
                    Ok(Some(TransferError::ChecksumMismatch {
                        expected: expected.to_string(),
                        actual,
                    }))
                }
            }
            None => {
                let actual = tokio::fs::metadata(local).await?.len();
                if actual == entry.size {
                    Ok(None)
                } else {
                    Ok(Some(TransferError::ChecksumMismatch {
                        expected: format!("{} bytes", entry.size),
                        actual: format!("{actual} bytes"),
                    }))
                }
            }
        }
    }
}

fn store_error(e: anyhow::Error) -> TransferError {
    TransferError::LocalIo(format!("progress store: {e:#}"))
}

fn invariant(e: DomainError) -> TransferError {
    TransferError::LocalIo(format!("sync record rejected update: {e}"))
}
