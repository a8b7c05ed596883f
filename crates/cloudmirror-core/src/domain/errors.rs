//! Domain error types
//!
//! This module defines two families of errors:
//! - [`DomainError`] for validation failures and invalid state transitions
//! - [`TransferError`] for the closed set of transfer failures, each of which
//!   maps onto exactly one [`ErrorKind`] consumed by the retry policy

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid relative path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid checksum format (expected lowercase hex MD5)
    #[error("Invalid checksum format: {0}")]
    InvalidChecksum(String),

    /// Invalid remote ID format
    #[error("Invalid remote ID: {0}")]
    InvalidRemoteId(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Chunk index or bitmap shape mismatch
    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Closed classification of transfer failures
///
/// Every failure observed by the download path is reduced to one of these
/// kinds before it reaches the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network timeout, connection reset, server-side 5xx
    Transient,
    /// The remote asked us to slow down
    RateLimited,
    /// Bearer token no longer accepted
    AuthExpired,
    /// Remote object vanished
    NotFound,
    /// Remote refused access
    PermissionDenied,
    /// Whole-file digest did not match the remote checksum
    ChecksumMismatch,
    /// Local disk failure (full disk, permissions, missing parent)
    LocalIo,
}

impl ErrorKind {
    /// Stable lowercase name used for persistence and logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::AuthExpired => "auth_expired",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::LocalIo => "local_io",
        }
    }

    /// Whether a failure of this kind can never succeed by retrying the same request
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::PermissionDenied | Self::LocalIo
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ErrorKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "rate_limited" => Ok(Self::RateLimited),
            "auth_expired" => Ok(Self::AuthExpired),
            "not_found" => Ok(Self::NotFound),
            "permission_denied" => Ok(Self::PermissionDenied),
            "checksum_mismatch" => Ok(Self::ChecksumMismatch),
            "local_io" => Ok(Self::LocalIo),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown error kind: {other}"
            ))),
        }
    }
}

/// A failure observed while moving bytes for one file
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Retryable network-level failure
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Remote rate limiting, optionally with a retry-after hint
    #[error("Rate limited by remote{}", retry_after_suffix(.retry_after))]
    RateLimited {
        /// Delay the remote asked for, if any
        retry_after: Option<Duration>,
    },

    /// Credentials must be refreshed by the caller
    #[error("Credentials expired")]
    AuthExpired,

    /// Remote object does not exist
    #[error("Remote object not found: {0}")]
    NotFound(String),

    /// Remote refused access to the object
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Whole-file digest mismatch after download
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum announced by the remote listing
        expected: String,
        /// Checksum computed over the local bytes
        actual: String,
    },

    /// Local filesystem failure
    #[error("Local I/O error: {0}")]
    LocalIo(String),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}ms)", d.as_millis()),
        None => String::new(),
    }
}

impl TransferError {
    /// Classify this failure
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) => ErrorKind::Transient,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::AuthExpired => ErrorKind::AuthExpired,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::LocalIo(_) => ErrorKind::LocalIo,
        }
    }

    /// Retry-after hint carried by a rate-limit response
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::LocalIo(err.to_string())
    }
}
