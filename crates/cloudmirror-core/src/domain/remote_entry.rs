//! Remote entries as observed in a listing snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{Checksum, RelativePath, RemoteId};

/// One file or folder from the remote store's metadata listing
///
/// Identity is [`RemoteEntry::id`]; the path may change on rename. Entries are
/// immutable once observed in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Stable remote identifier
    pub id: RemoteId,
    /// Logical path relative to the sync root
    pub path: RelativePath,
    /// Size in bytes (zero for directories)
    pub size: u64,
    /// MD5 content digest; `None` for directories and for remote objects
    /// that expose no digest
    pub checksum: Option<Checksum>,
    /// Last modification time on the remote side
    pub modified_time: DateTime<Utc>,
    /// Whether this entry is a folder
    pub is_directory: bool,
}

impl RemoteEntry {
    /// Build a file entry
    pub fn file(
        id: RemoteId,
        path: RelativePath,
        size: u64,
        checksum: Option<Checksum>,
        modified_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            path,
            size,
            checksum,
            modified_time,
            is_directory: false,
        }
    }

    /// Build a directory entry
    pub fn directory(id: RemoteId, path: RelativePath, modified_time: DateTime<Utc>) -> Self {
        Self {
            id,
            path,
            size: 0,
            checksum: None,
            modified_time,
            is_directory: true,
        }
    }

    /// Whether the content identity (size and checksum) differs from the given values
    #[must_use]
    pub fn content_differs(&self, size: u64, checksum: Option<&Checksum>) -> bool {
        self.size != size || self.checksum.as_ref() != checksum
    }
}
