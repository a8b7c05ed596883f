//! Domain entities and business logic
//!
//! This module contains the core domain types for CloudMirror:
//! - Newtypes for remote identifiers, relative paths and content checksums
//! - Remote entries as observed in a listing snapshot
//! - Chunk partitioning and the verified-chunk bitmap
//! - Sync records with their state machine
//! - Sync tasks, decisions and priority ordering
//! - Entry filters
//! - Domain-specific error types

pub mod chunk;
pub mod errors;
pub mod filter;
pub mod newtypes;
pub mod remote_entry;
pub mod sync_record;
pub mod task;

// Re-export commonly used types
pub use chunk::{Chunk, ChunkBitmap};
pub use errors::{DomainError, ErrorKind, TransferError};
pub use filter::{EntryPredicate, SyncFilter};
pub use newtypes::{Checksum, RelativePath, RemoteId, RunId};
pub use remote_entry::RemoteEntry;
pub use sync_record::{LastError, LocalState, RecordParts, SyncRecord};
pub use task::{sort_by_priority, Decision, SyncTask};
