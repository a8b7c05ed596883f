//! Content-fetch port (driven/secondary port)
//!
//! The engine names byte ranges and consumes byte streams. How a range is
//! requested over the wire is the adapter's business.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use super::credentials::AccessToken;
use crate::domain::{Chunk, RemoteId, TransferError};

/// Stream of content bytes for one requested range
///
/// A well-behaved adapter yields exactly the requested number of bytes.
/// Callers treat a stream that ends early as a transient failure.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes in the range
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inclusive last byte, as used by HTTP `Range: bytes=a-b` headers
    pub fn last_inclusive(&self) -> Option<u64> {
        (!self.is_empty()).then(|| self.end - 1)
    }
}

impl From<&Chunk> for ByteRange {
    fn from(chunk: &Chunk) -> Self {
        Self::new(chunk.offset, chunk.end())
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Byte-range retrieval of remote content
///
/// Implementations classify every failure into a [`TransferError`] so the
/// retry policy can act on it: network trouble is `Transient`, throttling is
/// `RateLimited` (with the server's retry-after hint when present), and
/// missing or forbidden objects are `NotFound` / `PermissionDenied`.
#[async_trait]
pub trait IContentFetcher: Send + Sync {
    /// Open a stream over `range` of the object identified by `id`
    async fn fetch(
        &self,
        id: &RemoteId,
        range: ByteRange,
        token: &AccessToken,
    ) -> Result<ByteStream, TransferError>;
}
