//! SyncRecord domain entity
//!
//! A SyncRecord is the durable local knowledge of one remote entry: which
//! content identity was selected for transfer, which chunks have been
//! verified-written, and how previous attempts ended.
//!
//! ## State Machine
//!
//! ```text
//!                 begin_attempt                complete_verified
//!   ┌─────────┐ ──────────────► ┌────────────┐ ────────────────► ┌──────────┐
//!   │ Pending │                 │ InProgress │                   │ Complete │
//!   └─────────┘ ◄────────┐      └────────────┘                   └──────────┘
//!        │               │         │      ▲                            │
//!        │ skip          │ rebase  │ fail │ begin_attempt              │ rebase
//!        ▼               │         ▼      │                            ▼
//!   ┌─────────┐          │      ┌────────────┐                    (Pending)
//!   │ Skipped │          └───── │   Failed   │
//!   └─────────┘                 └────────────┘
//! ```
//!
//! ## Invariants
//!
//! - `bytes_completed` always equals the summed length of the chunks set in
//!   the bitmap, and never exceeds `size`.
//! - `Complete` is only reachable through [`SyncRecord::complete_verified`],
//!   which the download manager calls after whole-file verification.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chunk::{Chunk, ChunkBitmap};
use super::errors::{DomainError, ErrorKind};
use super::newtypes::{Checksum, RelativePath, RemoteId};
use super::remote_entry::RemoteEntry;

// ============================================================================
// LocalState enum
// ============================================================================

/// Local transfer state of a remote entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalState {
    /// Selected for transfer, nothing attempted yet
    #[default]
    Pending,
    /// A download manager owns this record or was interrupted while owning it
    InProgress,
    /// Whole file verified on disk
    Complete,
    /// Last run gave up on this file
    Failed,
    /// Excluded from transfer
    Skipped,
}

impl LocalState {
    /// All states, in display order
    pub const ALL: [LocalState; 5] = [
        Self::Pending,
        Self::InProgress,
        Self::Complete,
        Self::Failed,
        Self::Skipped,
    ];

    /// Returns a lowercase name suitable for persistence
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Whether a new run should resume or restart work on this record
    pub fn needs_work(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress | Self::Failed)
    }
}

impl fmt::Display for LocalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LocalState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.name() == s)
            .ok_or_else(|| DomainError::ValidationFailed(format!("unknown local state: {s}")))
    }
}

// ============================================================================
// LastError
// ============================================================================

/// The most recent failure recorded against a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    /// Classified kind
    pub kind: ErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl LastError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

// ============================================================================
// SyncRecord entity
// ============================================================================

/// Persisted transfer state of one remote entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    id: RemoteId,
    path: RelativePath,
    checksum: Option<Checksum>,
    size: u64,
    is_directory: bool,
    modified_time: DateTime<Utc>,
    chunk_size: u64,
    state: LocalState,
    bytes_completed: u64,
    chunk_bitmap: ChunkBitmap,
    chunk_digests: BTreeMap<u32, String>,
    last_error: Option<LastError>,
    last_attempt_time: Option<DateTime<Utc>>,
    attempt_count: u32,
    failure_count: u32,
    corruption_count: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Plain field set used by stores to rebuild a [`SyncRecord`]
///
/// `bytes_completed` is not part of the parts: it is always derived from the
/// bitmap on restore.
#[derive(Debug, Clone)]
pub struct RecordParts {
    pub id: RemoteId,
    pub path: RelativePath,
    pub checksum: Option<Checksum>,
    pub size: u64,
    pub is_directory: bool,
    pub modified_time: DateTime<Utc>,
    pub chunk_size: u64,
    pub state: LocalState,
    pub chunk_bitmap: ChunkBitmap,
    pub chunk_digests: BTreeMap<u32, String>,
    pub last_error: Option<LastError>,
    pub last_attempt_time: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub failure_count: u32,
    pub corruption_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncRecord {
    /// Create a Pending record for an entry first selected for transfer
    pub fn new(entry: &RemoteEntry, chunk_size: u64) -> Self {
        let now = Utc::now();
        let chunk_size = if entry.is_directory { 0 } else { chunk_size };
        Self {
            id: entry.id.clone(),
            path: entry.path.clone(),
            checksum: entry.checksum.clone(),
            size: entry.size,
            is_directory: entry.is_directory,
            modified_time: entry.modified_time,
            chunk_size,
            state: LocalState::Pending,
            bytes_completed: 0,
            chunk_bitmap: ChunkBitmap::new(Self::chunk_len(entry.size, chunk_size)),
            chunk_digests: BTreeMap::new(),
            last_error: None,
            last_attempt_time: None,
            attempt_count: 0,
            failure_count: 0,
            corruption_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a record from persisted parts
    ///
    /// # Errors
    /// Returns error if the bitmap does not match the chunk partition of `size`
    pub fn restore(parts: RecordParts) -> Result<Self, DomainError> {
        let expected = Self::chunk_len(parts.size, parts.chunk_size);
        if parts.chunk_bitmap.len() != expected {
            return Err(DomainError::InvalidChunk(format!(
                "record {} has a bitmap of {} chunks, expected {expected}",
                parts.id,
                parts.chunk_bitmap.len()
            )));
        }

        let mut record = Self {
            id: parts.id,
            path: parts.path,
            checksum: parts.checksum,
            size: parts.size,
            is_directory: parts.is_directory,
            modified_time: parts.modified_time,
            chunk_size: parts.chunk_size,
            state: parts.state,
            bytes_completed: 0,
            chunk_bitmap: parts.chunk_bitmap,
            chunk_digests: parts.chunk_digests,
            last_error: parts.last_error,
            last_attempt_time: parts.last_attempt_time,
            attempt_count: parts.attempt_count,
            failure_count: parts.failure_count,
            corruption_count: parts.corruption_count,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        };
        let bitmap = record.chunk_bitmap.clone();
        record.chunk_digests.retain(|index, _| bitmap.is_set(*index));
        record.recompute_bytes();
        Ok(record)
    }

    fn chunk_len(size: u64, chunk_size: u64) -> u32 {
        if chunk_size == 0 {
            0
        } else {
            Chunk::count(size, chunk_size)
        }
    }

    // ------------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------------

    pub fn id(&self) -> &RemoteId {
        &self.id
    }

    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn modified_time(&self) -> DateTime<Utc> {
        self.modified_time
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn state(&self) -> LocalState {
        self.state
    }

    pub fn bytes_completed(&self) -> u64 {
        self.bytes_completed
    }

    pub fn chunk_bitmap(&self) -> &ChunkBitmap {
        &self.chunk_bitmap
    }

    /// Stored MD5 digest of verified chunk `index`
    pub fn chunk_digest(&self, index: u32) -> Option<&str> {
        self.chunk_digests.get(&index).map(String::as_str)
    }

    pub fn chunk_digests(&self) -> &BTreeMap<u32, String> {
        &self.chunk_digests
    }

    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    pub fn last_attempt_time(&self) -> Option<DateTime<Utc>> {
        self.last_attempt_time
    }

    /// Attempt number of the current chunk failure streak (0 when clean)
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Number of runs that ended with this file `Failed`
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Number of whole-file checksum mismatches since the content last changed
    pub fn corruption_count(&self) -> u32 {
        self.corruption_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The remote identity this record was last synced against
    pub fn to_entry(&self) -> RemoteEntry {
        RemoteEntry {
            id: self.id.clone(),
            path: self.path.clone(),
            size: self.size,
            checksum: self.checksum.clone(),
            modified_time: self.modified_time,
            is_directory: self.is_directory,
        }
    }

    /// Fraction of bytes verified, in `[0.0, 1.0]`
    pub fn progress(&self) -> f64 {
        if self.size == 0 {
            return if self.state == LocalState::Complete {
                1.0
            } else {
                0.0
            };
        }
        self.bytes_completed as f64 / self.size as f64
    }

    // ------------------------------------------------------------------------
    // Chunk bookkeeping
    // ------------------------------------------------------------------------

    /// The full chunk partition of this file
    pub fn chunks(&self) -> Vec<Chunk> {
        if self.is_directory || self.chunk_size == 0 {
            return Vec::new();
        }
        Chunk::partition(self.size, self.chunk_size)
    }

    /// Chunks not yet verified, in ascending offset order
    pub fn pending_chunks(&self) -> Vec<Chunk> {
        self.chunk_bitmap
            .unset_indices()
            .filter_map(|index| Chunk::nth(self.size, self.chunk_size, index))
            .collect()
    }

    /// Chunks already verified, in ascending offset order
    pub fn verified_chunks(&self) -> Vec<Chunk> {
        self.chunk_bitmap
            .set_indices()
            .filter_map(|index| Chunk::nth(self.size, self.chunk_size, index))
            .collect()
    }

    /// Record that `chunk` has reached stable storage with the given digest
    ///
    /// Must only be called after the chunk bytes have been synced to disk.
    ///
    /// # Errors
    /// Returns error if the record is not in progress or the chunk does not
    /// belong to this file's partition
    pub fn mark_chunk_verified(&mut self, chunk: &Chunk, digest: String) -> Result<(), DomainError> {
        if self.state != LocalState::InProgress {
            return Err(DomainError::InvalidState {
                from: self.state.name().to_string(),
                to: "chunk_verified".to_string(),
            });
        }
        if Chunk::nth(self.size, self.chunk_size, chunk.index) != Some(*chunk) {
            return Err(DomainError::InvalidChunk(format!(
                "chunk {} [{}, {}) is not part of {}",
                chunk.index,
                chunk.offset,
                chunk.end(),
                self.id
            )));
        }
        self.chunk_bitmap.set(chunk.index)?;
        self.chunk_digests.insert(chunk.index, digest);
        self.recompute_bytes();
        self.touch();
        Ok(())
    }

    /// Forget a chunk that failed re-validation
    ///
    /// # Errors
    /// Returns error if the index is out of range
    pub fn invalidate_chunk(&mut self, index: u32) -> Result<(), DomainError> {
        self.chunk_bitmap.clear(index)?;
        self.chunk_digests.remove(&index);
        self.recompute_bytes();
        self.touch();
        Ok(())
    }

    /// Clear every chunk and reset byte progress
    pub fn discard_progress(&mut self) {
        self.chunk_bitmap.clear_all();
        self.chunk_digests.clear();
        self.bytes_completed = 0;
        self.touch();
    }

    /// Re-partition for a different chunk size, discarding progress if it changed
    ///
    /// Returns `true` when the bitmap was replaced.
    pub fn adopt_chunk_size(&mut self, chunk_size: u64) -> bool {
        if self.is_directory || self.chunk_size == chunk_size {
            return false;
        }
        self.chunk_size = chunk_size;
        self.chunk_bitmap = ChunkBitmap::new(Self::chunk_len(self.size, chunk_size));
        self.discard_progress();
        true
    }

    fn recompute_bytes(&mut self) {
        self.bytes_completed = self
            .verified_chunks()
            .iter()
            .map(|c| c.length)
            .sum::<u64>()
            .min(self.size);
    }

    // ------------------------------------------------------------------------
    // Identity updates (re-scan)
    // ------------------------------------------------------------------------

    /// Adopt the identity observed in a newer snapshot
    ///
    /// A rename only updates the path. A content change (size or checksum)
    /// supersedes all progress: the bitmap is rebuilt, counters reset and the
    /// record returns to `Pending`. Returns `true` on a content change.
    pub fn rebase(&mut self, entry: &RemoteEntry) -> bool {
        self.path = entry.path.clone();
        self.modified_time = entry.modified_time;

        let changed = entry.content_differs(self.size, self.checksum.as_ref());
        if changed {
            self.size = entry.size;
            self.checksum = entry.checksum.clone();
            self.chunk_bitmap = ChunkBitmap::new(Self::chunk_len(entry.size, self.chunk_size));
            self.discard_progress();
            self.attempt_count = 0;
            self.failure_count = 0;
            self.corruption_count = 0;
            self.last_error = None;
            self.state = LocalState::Pending;
        }
        self.touch();
        changed
    }

    // ------------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------------

    /// Checks if a state transition is valid
    ///
    /// Valid transitions:
    /// - Pending -> InProgress, Failed, Skipped
    /// - InProgress -> InProgress (resume), Complete, Failed, Pending
    /// - Failed -> InProgress, Pending
    /// - Complete -> Pending (content changed or local copy lost)
    /// - Skipped -> Pending
    pub fn can_transition_to(&self, target: LocalState) -> bool {
        use LocalState::*;
        matches!(
            (self.state, target),
            (Pending, InProgress)
                | (Pending, Failed)
                | (Pending, Skipped)
                | (InProgress, InProgress)
                | (InProgress, Complete)
                | (InProgress, Failed)
                | (InProgress, Pending)
                | (Failed, InProgress)
                | (Failed, Pending)
                | (Complete, Pending)
                | (Skipped, Pending)
        )
    }

    fn transition_to(&mut self, target: LocalState) -> Result<(), DomainError> {
        if !self.can_transition_to(target) {
            return Err(DomainError::InvalidState {
                from: self.state.name().to_string(),
                to: target.name().to_string(),
            });
        }
        self.state = target;
        self.touch();
        Ok(())
    }

    /// Take ownership for a transfer attempt
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(LocalState::InProgress)?;
        self.last_attempt_time = Some(now);
        Ok(())
    }

    /// Record one attempt on the chunk currently failing
    ///
    /// `attempt` is the 1-based attempt number of that chunk.
    pub fn record_chunk_attempt(&mut self, attempt: u32, error: Option<LastError>) {
        self.attempt_count = attempt;
        if error.is_some() {
            self.last_error = error;
        }
        self.last_attempt_time = Some(Utc::now());
        self.touch();
    }

    /// Count a whole-file checksum mismatch and discard all chunk state
    ///
    /// Returns the updated corruption count.
    pub fn record_corruption(&mut self, message: impl Into<String>) -> u32 {
        self.corruption_count += 1;
        self.last_error = Some(LastError::new(ErrorKind::ChecksumMismatch, message));
        self.discard_progress();
        self.corruption_count
    }

    /// Mark the file verified on disk
    ///
    /// # Errors
    /// Returns error if not every chunk is verified or the record is not in progress
    pub fn complete_verified(&mut self) -> Result<(), DomainError> {
        if !self.chunk_bitmap.is_complete() {
            return Err(DomainError::InvalidState {
                from: format!(
                    "{} ({}/{} chunks)",
                    self.state,
                    self.chunk_bitmap.count_set(),
                    self.chunk_bitmap.len()
                ),
                to: LocalState::Complete.name().to_string(),
            });
        }
        self.transition_to(LocalState::Complete)?;
        self.attempt_count = 0;
        self.failure_count = 0;
        self.corruption_count = 0;
        self.last_error = None;
        Ok(())
    }

    /// Give up on this file for the current run
    ///
    /// `counts_toward_ceiling` is false for failures the caller can fix
    /// without retrying the same content (expired credentials).
    pub fn fail(&mut self, error: LastError, counts_toward_ceiling: bool) -> Result<(), DomainError> {
        self.transition_to(LocalState::Failed)?;
        if counts_toward_ceiling {
            self.failure_count += 1;
        }
        self.last_error = Some(error);
        Ok(())
    }

    /// Exclude this record from transfer
    pub fn skip(&mut self) -> Result<(), DomainError> {
        self.transition_to(LocalState::Skipped)
    }

    /// Return to Pending, keeping verified chunks
    pub fn reset_to_pending(&mut self) -> Result<(), DomainError> {
        if self.state == LocalState::Pending {
            return Ok(());
        }
        self.transition_to(LocalState::Pending)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
