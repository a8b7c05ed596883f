//! Remote listing port

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::RemoteEntry;

/// Failure to enumerate the remote tree
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListingError {
    /// The remote could not be reached or refused to list
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Credentials must be refreshed before listing
    #[error("Credentials expired")]
    AuthExpired,
}

/// Enumerates every entry beneath a remote root
#[async_trait]
pub trait IRemoteLister: Send + Sync {
    /// List all entries under `root_id`, recursively, as a flat snapshot
    async fn list_entries(&self, root_id: &str) -> Result<Vec<RemoteEntry>, ListingError>;
}
