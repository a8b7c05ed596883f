//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! engine. Ports are interfaces that the sync crate depends on, but whose
//! implementations live in adapter crates or in the caller.
//!
//! ## Ports Overview
//!
//! - [`IProgressStore`] - Durable per-file transfer state and error log
//! - [`IContentFetcher`] - Byte-range content retrieval
//! - [`IRemoteLister`] - Remote tree enumeration
//! - [`ICredentialProvider`] - Bearer tokens on demand

pub mod content_fetch;
pub mod credentials;
pub mod progress_store;
pub mod remote_listing;

pub use content_fetch::{ByteRange, ByteStream, IContentFetcher};
pub use credentials::{AccessToken, ICredentialProvider, StaticCredentials};
pub use progress_store::{ErrorLogEntry, IProgressStore, RecordFilter, StateCounts};
pub use remote_listing::{IRemoteLister, ListingError};
