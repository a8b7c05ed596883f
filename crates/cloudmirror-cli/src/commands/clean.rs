//! Clean command - Remove orphaned local copies
//!
//! Re-plans against the source so only entries that are orphaned right now
//! are touched, then removes them deepest path first. Without `--yes` the
//! command only lists what it would remove.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use cloudmirror_sync::SyncEngine;
use tracing::warn;

use super::orphans::print_orphans;
use super::{CliContext, Session};
use crate::output::{get_formatter, plural};

/// Remove orphaned local copies and their records
#[derive(Debug, Args)]
pub struct CleanCommand {
    /// Source directory to compare against
    pub source: PathBuf,

    /// Actually delete; otherwise only list
    #[arg(long, short = 'y')]
    pub yes: bool,
}

impl CleanCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let session = Session::with_source(ctx, &self.source).await?;
        let plan = session.plan().await?;

        if plan.orphans.is_empty() {
            if ctx.format.is_json() {
                formatter.print_json(&serde_json::json!({ "removed": [], "failed": [] }));
            } else {
                formatter.success("No orphans to clean");
            }
            return Ok(());
        }

        if !self.yes {
            if ctx.format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "dry_run": true,
                    "orphans": plan.orphans,
                }));
            } else {
                formatter.warn(&format!(
                    "{} would be removed:",
                    plural(plan.orphans.len() as u64, "record")
                ));
                print_orphans(&plan.orphans, &*formatter);
                formatter.info("");
                formatter.info("Re-run with --yes to delete them.");
            }
            return Ok(());
        }

        let mut removed = Vec::new();
        let mut failed = Vec::new();
        for orphan in SyncEngine::orphan_cleanup_order(&plan.orphans) {
            let path = orphan.entry.path.to_string();
            match session.engine.cleanup_orphan(&orphan.entry.id).await {
                Ok(_) => removed.push(path),
                Err(e) => {
                    warn!(path = %path, error = %e, "Orphan cleanup failed");
                    failed.push((path, e.to_string()));
                }
            }
        }

        if ctx.format.is_json() {
            let failed: Vec<_> = failed
                .iter()
                .map(|(path, error)| serde_json::json!({ "path": path, "error": error }))
                .collect();
            formatter.print_json(&serde_json::json!({
                "removed": removed,
                "failed": failed,
            }));
        } else {
            formatter.success(&format!(
                "Removed {}",
                plural(removed.len() as u64, "orphan")
            ));
            for (path, error) in &failed {
                formatter.error(&format!("{path}: {error}"));
            }
        }

        if !failed.is_empty() {
            anyhow::bail!("{} could not be removed", plural(failed.len() as u64, "orphan"));
        }
        Ok(())
    }
}
