//! Local target files
//!
//! [`LocalTarget`] owns every filesystem operation the engine performs under
//! the sync root.
//!
//! ## Design Decisions
//!
//! - **Pre-allocation**: a target file is opened without truncation and sized
//!   to the remote length before the first chunk lands, so chunk writers can
//!   address disjoint offsets and a resumed run keeps earlier chunks.
//! - **Write-then-mark**: [`LocalTarget::write_chunk`] returns only after
//!   `sync_data`, so the caller may set the bitmap bit afterwards.
//! - **MD5**: chunk and whole-file digests use `md-5`, rendered as lowercase
//!   hex to compare directly against remote checksums.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use md5::{Digest, Md5};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, instrument, trace};

use cloudmirror_core::domain::{Chunk, RelativePath};

/// Read buffer size for whole-file hashing
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// MD5 of `data` as lowercase hex
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Filesystem operations rooted at the local sync directory
#[derive(Debug, Clone)]
pub struct LocalTarget {
    root: PathBuf,
}

impl LocalTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute local path of a relative remote path
    pub fn path_for(&self, path: &RelativePath) -> PathBuf {
        path.to_local(&self.root)
    }

    /// Whether the sync root exists and is a directory
    pub async fn root_available(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Length of the local file, `None` when it does not exist
    pub async fn file_len(&self, path: &RelativePath) -> io::Result<Option<u64>> {
        match tokio::fs::metadata(self.path_for(path)).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create the directory for a remote folder, including parents
    #[instrument(skip(self), fields(path = %path))]
    pub async fn create_directory(&self, path: &RelativePath) -> io::Result<PathBuf> {
        let local = self.path_for(path);
        tokio::fs::create_dir_all(&local).await?;
        debug!("directory materialized");
        Ok(local)
    }

    /// Open (creating if needed) the target file and size it to `size`
    ///
    /// Existing bytes are preserved.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn prepare_file(&self, path: &RelativePath, size: u64) -> io::Result<PathBuf> {
        let local = self.path_for(path);
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&local)
            .await?;
        if file.metadata().await?.len() != size {
            file.set_len(size).await?;
            debug!(size, "pre-allocated target file");
        }
        Ok(local)
    }

    /// Move the local copy of a renamed entry
    ///
    /// Does nothing if the old path is gone or the new path is taken.
    /// Returns `true` if the file was moved.
    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn relocate(&self, from: &RelativePath, to: &RelativePath) -> io::Result<bool> {
        let old = self.path_for(from);
        let new = self.path_for(to);
        if !tokio::fs::try_exists(&old).await? || tokio::fs::try_exists(&new).await? {
            return Ok(false);
        }
        if let Some(parent) = new.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&old, &new).await?;
        debug!("local copy moved");
        Ok(true)
    }

    /// Write `data` at `offset` and flush it to stable storage
    pub async fn write_chunk(&self, local: &Path, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(local).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.sync_data().await?;
        trace!(offset, len = data.len(), "chunk written");
        Ok(())
    }

    /// MD5 of the bytes currently on disk for `chunk`
    pub async fn chunk_digest_on_disk(&self, local: &Path, chunk: &Chunk) -> io::Result<String> {
        let mut file = File::open(local).await?;
        file.seek(SeekFrom::Start(chunk.offset)).await?;
        let mut buf = vec![0u8; usize::try_from(chunk.length).map_err(io::Error::other)?];
        file.read_exact(&mut buf).await?;
        Ok(md5_hex(&buf))
    }

    /// MD5 of a whole local file, streamed
    #[instrument(skip(self))]
    pub async fn file_md5(&self, local: &Path) -> io::Result<String> {
        let mut file = File::open(local).await?;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Stamp the remote modification time on a completed file
    pub async fn set_modified_time(&self, local: &Path, time: DateTime<Utc>) -> io::Result<()> {
        let mtime = FileTime::from_unix_time(time.timestamp(), time.timestamp_subsec_nanos());
        let local = local.to_path_buf();
        tokio::task::spawn_blocking(move || filetime::set_file_mtime(&local, mtime))
            .await
            .map_err(io::Error::other)?
    }

    /// Remove the local copy of an orphaned entry
    ///
    /// Directories are only removed when empty. Returns `true` if something
    /// was removed.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn remove(&self, path: &RelativePath) -> io::Result<bool> {
        let local = self.path_for(path);
        let meta = match tokio::fs::symlink_metadata(&local).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        if meta.is_dir() {
            let mut entries = tokio::fs::read_dir(&local).await?;
            if entries.next_entry().await?.is_some() {
                debug!("directory not empty, keeping it");
                return Ok(false);
            }
            tokio::fs::remove_dir(&local).await?;
        } else {
            tokio::fs::remove_file(&local).await?;
        }
        debug!("local copy removed");
        Ok(true)
    }
}
