//! CloudMirror Sync - Resumable chunked download engine
//!
//! Provides:
//! - Snapshot diffing against persisted sync records
//! - Chunked, resumable, checksum-verified file transfers
//! - A bounded worker pool with per-file exclusivity, pause and cooperative cancellation
//! - An aggregate token-bucket bandwidth cap
//!
//! ## Modules
//!
//! - [`diff`] - Snapshot vs. record comparison producing ordered tasks
//! - [`retry`] - Pure retry/backoff decisions over the closed error taxonomy
//! - [`bandwidth`] - Shared token bucket, one token per byte
//! - [`download`] - Per-file chunked download manager
//! - [`locks`] - Per-remote-id exclusivity registry
//! - [`pause`] - Pause gate held at chunk boundaries
//! - [`scheduler`] - Bounded-concurrency driver and run reports
//! - [`filesystem`] - Target file pre-allocation, positional writes, MD5 hashing
//! - [`engine`] - `SyncEngine` facade (plan, run, cancel, progress)

pub mod bandwidth;
pub mod diff;
pub mod download;
pub mod engine;
pub mod filesystem;
pub mod locks;
pub mod pause;
pub mod report;
pub mod retry;
pub mod scheduler;

use std::path::PathBuf;

use thiserror::Error;

pub use engine::{CancelHandle, EngineSettings, ProgressSnapshot, RunOptions, SyncEngine};
pub use report::{FileOutcome, SyncReport, TaskStatus};

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The sync root is missing or not a directory
    #[error("Sync root unavailable: {0}")]
    RootUnavailable(PathBuf),

    /// The remote listing could not be obtained
    #[error("Listing failed: {0}")]
    Listing(#[from] cloudmirror_core::ports::ListingError),

    /// The progress store failed
    #[error("Progress store error: {0:#}")]
    Store(anyhow::Error),

    /// No orphan record with this id
    #[error("Not an orphan: {0}")]
    NotAnOrphan(String),

    /// A domain-level error propagated from cloudmirror-core
    #[error("Domain error: {0}")]
    DomainError(#[from] cloudmirror_core::domain::DomainError),
}
