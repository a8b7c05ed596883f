//! CloudMirror Core - Domain types and port definitions
//!
//! This crate contains the hexagonal architecture core of the mirror engine:
//! - **Domain entities** - `RemoteEntry`, `SyncRecord`, `SyncTask`, `Chunk`, `ChunkBitmap`
//! - **Error taxonomy** - the closed `ErrorKind` set consumed by the retry policy
//! - **Port definitions** - Traits for adapters: `IProgressStore`, `IContentFetcher`,
//!   `IRemoteLister`, `ICredentialProvider`
//! - **Configuration** - YAML configuration with validation
//!
//! # Architecture
//!
//! The domain module contains pure data and state-machine logic with no I/O.
//! Ports define trait interfaces that adapter crates implement. The sync crate
//! drives domain entities through these ports.

pub mod config;
pub mod domain;
pub mod ports;
