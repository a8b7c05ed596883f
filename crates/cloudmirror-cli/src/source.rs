//! Directory-backed remote source
//!
//! Treats a directory (typically a mounted network share or removable disk)
//! as the remote store. Listing walks the tree and hashes every file; fetches
//! read byte ranges straight from the files found by the last listing.
//!
//! Entry ids are derived from the device and inode numbers on Unix, so a
//! file keeps its id across renames inside the share.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::StreamExt;
use md5::{Digest, Md5};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

use cloudmirror_core::domain::{
    Checksum, DomainError, RelativePath, RemoteEntry, RemoteId, TransferError,
};
use cloudmirror_core::ports::{
    AccessToken, ByteRange, ByteStream, IContentFetcher, IRemoteLister, ListingError,
};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Remote listing and content fetch over a local directory tree
pub struct DirectorySource {
    root: PathBuf,
    /// Absolute file paths by id, filled by the last listing
    files: DashMap<RemoteId, PathBuf>,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a listing of `root_id` starts from
    ///
    /// `root` (or an empty id) is the source directory itself; anything else
    /// is a relative subdirectory.
    fn base_for(&self, root_id: &str) -> Result<PathBuf, ListingError> {
        if root_id.is_empty() || root_id == "root" {
            return Ok(self.root.clone());
        }
        let sub = Path::new(root_id);
        if sub
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ListingError::RemoteUnavailable(format!(
                "invalid remote root: {root_id}"
            )));
        }
        Ok(self.root.join(sub))
    }

    async fn entry_for(
        &self,
        base: &Path,
        local: &Path,
        meta: &std::fs::Metadata,
    ) -> io::Result<Option<RemoteEntry>> {
        let Some(path) = relative_path(base, local) else {
            warn!(path = %local.display(), "Skipping entry with an unusable name");
            return Ok(None);
        };
        let Ok(id) = entry_id(meta, &path) else {
            warn!(path = %local.display(), "Skipping entry without a usable id");
            return Ok(None);
        };
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        if meta.is_dir() {
            return Ok(Some(RemoteEntry::directory(id, path, modified)));
        }

        let checksum = file_md5(local).await?;
        self.files.insert(id.clone(), local.to_path_buf());
        let checksum = checksum.parse::<Checksum>().map_err(io::Error::other)?;
        Ok(Some(RemoteEntry::file(
            id,
            path,
            meta.len(),
            Some(checksum),
            modified,
        )))
    }
}

#[async_trait]
impl IRemoteLister for DirectorySource {
    #[instrument(skip(self), fields(source = %self.root.display()))]
    async fn list_entries(&self, root_id: &str) -> Result<Vec<RemoteEntry>, ListingError> {
        let base = self.base_for(root_id)?;
        match tokio::fs::metadata(&base).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(ListingError::RemoteUnavailable(format!(
                    "{} is not a directory",
                    base.display()
                )))
            }
            Err(e) => {
                return Err(ListingError::RemoteUnavailable(format!(
                    "{}: {e}",
                    base.display()
                )))
            }
        }

        self.files.clear();
        let mut entries = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut reader = match tokio::fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(e) if dir == base => {
                    return Err(ListingError::RemoteUnavailable(format!(
                        "{}: {e}",
                        base.display()
                    )))
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };

            loop {
                let child = match reader.next_entry().await {
                    Ok(Some(child)) => child,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Directory listing interrupted");
                        break;
                    }
                };
                let local = child.path();
                let meta = match tokio::fs::symlink_metadata(&local).await {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!(path = %local.display(), error = %e, "Skipping unreadable entry");
                        continue;
                    }
                };
                if meta.file_type().is_symlink() || !(meta.is_dir() || meta.is_file()) {
                    debug!(path = %local.display(), "Skipping special file");
                    continue;
                }

                match self.entry_for(&base, &local, &meta).await {
                    Ok(Some(entry)) => {
                        if entry.is_directory {
                            pending.push(local);
                        }
                        entries.push(entry);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(path = %local.display(), error = %e, "Skipping unreadable file"),
                }
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(entries = entries.len(), "Source listed");
        Ok(entries)
    }
}

#[async_trait]
impl IContentFetcher for DirectorySource {
    async fn fetch(
        &self,
        id: &RemoteId,
        range: ByteRange,
        _token: &AccessToken,
    ) -> Result<ByteStream, TransferError> {
        let path = self
            .files
            .get(id)
            .map(|p| p.value().clone())
            .ok_or_else(|| TransferError::NotFound(format!("{id} is not in the last listing")))?;

        let mut file = File::open(&path).await.map_err(classify)?;
        file.seek(SeekFrom::Start(range.start))
            .await
            .map_err(classify)?;

        let stream = ReaderStream::new(file.take(range.len())).map(|item| item.map_err(classify));
        Ok(stream.boxed())
    }
}

/// Map a read failure onto the transfer taxonomy
fn classify(e: io::Error) -> TransferError {
    match e.kind() {
        io::ErrorKind::NotFound => TransferError::NotFound(e.to_string()),
        io::ErrorKind::PermissionDenied => TransferError::PermissionDenied(e.to_string()),
        _ => TransferError::Transient(e.to_string()),
    }
}

fn relative_path(base: &Path, local: &Path) -> Option<RelativePath> {
    let rel = local.strip_prefix(base).ok()?;
    let parts: Option<Vec<&str>> = rel
        .components()
        .map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect();
    RelativePath::new(parts?.join("/")).ok()
}

#[cfg(unix)]
fn entry_id(meta: &std::fs::Metadata, _path: &RelativePath) -> Result<RemoteId, DomainError> {
    use std::os::unix::fs::MetadataExt;

    RemoteId::new(format!("{:x}-{:x}", meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn entry_id(_meta: &std::fs::Metadata, path: &RelativePath) -> Result<RemoteId, DomainError> {
    RemoteId::new(format!("path-{}", hex::encode(path.as_str())))
}

async fn file_md5(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
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
