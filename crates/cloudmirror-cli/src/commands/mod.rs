//! CLI command implementations
//!
//! Each subcommand is defined in its own module and exposes an `execute`
//! method that takes the shared [`CliContext`].

pub mod clean;
pub mod completions;
pub mod config;
pub mod errors;
pub mod orphans;
pub mod plan;
pub mod run;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use cloudmirror_cache::{DatabasePool, SqliteProgressStore};
use cloudmirror_core::config::Config;
use cloudmirror_core::domain::{RemoteId, TransferError};
use cloudmirror_core::ports::{
    AccessToken, ByteRange, ByteStream, IContentFetcher, IProgressStore, StaticCredentials,
};
use cloudmirror_sync::diff::SyncPlan;
use cloudmirror_sync::{EngineSettings, SyncEngine};

use crate::output::OutputFormat;
use crate::source::DirectorySource;

/// Options shared by every command
#[derive(Debug, Clone)]
pub struct CliContext {
    pub format: OutputFormat,
    pub config_path: PathBuf,
}

impl CliContext {
    pub fn new(format: OutputFormat, config_path: PathBuf) -> Self {
        Self {
            format,
            config_path,
        }
    }

    /// Load the config file, falling back to defaults when it is absent or unreadable
    pub fn load_config(&self) -> Config {
        if !self.config_path.exists() {
            return Config::default();
        }
        Config::load(&self.config_path).unwrap_or_else(|e| {
            warn!(path = %self.config_path.display(), error = %e, "Ignoring unreadable config file");
            Config::default()
        })
    }
}

/// Opened progress store plus an engine wired to it
pub struct Session {
    pub config: Config,
    pub store: Arc<dyn IProgressStore>,
    pub engine: SyncEngine,
}

impl Session {
    /// Open a session against a source directory
    pub async fn with_source(ctx: &CliContext, source: &Path) -> Result<Self> {
        let source = Arc::new(DirectorySource::new(source));
        Self::open(ctx, source.clone(), Some(source)).await
    }

    /// Open a session that only reads local progress
    pub async fn offline(ctx: &CliContext) -> Result<Self> {
        Self::open(ctx, Arc::new(Offline), None).await
    }

    async fn open(
        ctx: &CliContext,
        fetcher: Arc<dyn IContentFetcher>,
        lister: Option<Arc<DirectorySource>>,
    ) -> Result<Self> {
        let config = ctx.load_config();
        debug!(database = %config.sync.database.display(), "Opening progress store");

        let pool = DatabasePool::new(&config.sync.database)
            .await
            .context("Failed to open progress database")?;
        let store: Arc<dyn IProgressStore> =
            Arc::new(SqliteProgressStore::new(pool.pool().clone()));

        let mut engine = SyncEngine::new(
            store.clone(),
            fetcher,
            Arc::new(StaticCredentials::anonymous()),
            EngineSettings::from_config(&config),
        );
        if let Some(lister) = lister {
            engine = engine.with_lister(lister);
        }

        Ok(Self {
            config,
            store,
            engine,
        })
    }

    /// List the source and diff it against local progress
    pub async fn plan(&self) -> Result<SyncPlan> {
        let snapshot = self
            .engine
            .scan(&self.config.sync.remote_root)
            .await
            .context("Failed to list source")?;
        let plan = self
            .engine
            .plan_sync(snapshot, &self.config.filters.to_filter())
            .await
            .context("Failed to plan sync")?;
        Ok(plan)
    }
}

/// Fetcher for sessions without a source attached
struct Offline;

#[async_trait]
impl IContentFetcher for Offline {
    async fn fetch(
        &self,
        id: &RemoteId,
        _range: ByteRange,
        _token: &AccessToken,
    ) -> Result<ByteStream, TransferError> {
        Err(TransferError::NotFound(format!("{id}: no source attached")))
    }
}

/// Fixed-width textual progress bar, e.g. `[#####-----]`
pub fn progress_bar(fraction: f64, width: usize) -> String {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = (fraction * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
