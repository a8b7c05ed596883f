//! Status command - Display transfer progress
//!
//! Provides the `cloudmirror status` CLI command which:
//! 1. Shows record counts by state and overall byte progress
//! 2. Lists unfinished transfers with their per-file progress
//! 3. Lists failed files with the last recorded error

use anyhow::Result;
use clap::Args;
use cloudmirror_core::domain::{LocalState, SyncRecord};
use cloudmirror_sync::ProgressSnapshot;

use super::{progress_bar, CliContext, Session};
use crate::output::{format_bytes, get_formatter, OutputFormatter};

const BAR_WIDTH: usize = 30;
const PATH_WIDTH: usize = 50;

/// Show per-file transfer progress
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Also list completed files
    #[arg(long)]
    pub all: bool,
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let session = Session::offline(ctx).await?;
        let progress = session.engine.get_progress().await?;

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::to_value(&progress)?);
            return Ok(());
        }

        self.print_status(&progress, &*formatter);
        Ok(())
    }

    fn print_status(&self, progress: &ProgressSnapshot, formatter: &dyn OutputFormatter) {
        if progress.records.is_empty() {
            formatter.info("Nothing recorded yet. Run 'cloudmirror run <source>' first.");
            return;
        }

        formatter.success(&format!(
            "{} {:.1}% ({} of {})",
            progress_bar(progress.fraction(), BAR_WIDTH),
            progress.fraction() * 100.0,
            format_bytes(progress.bytes_completed),
            format_bytes(progress.bytes_total)
        ));
        formatter.info("");

        formatter.info("State         Count");
        formatter.info("------------- -----");
        for state in [
            LocalState::Pending,
            LocalState::InProgress,
            LocalState::Complete,
            LocalState::Failed,
            LocalState::Skipped,
        ] {
            let count = progress.counts.get(state);
            if count > 0 {
                formatter.info(&format!("{:<13} {}", state.name(), count));
            }
        }

        let unfinished: Vec<&SyncRecord> = progress
            .records
            .iter()
            .filter(|r| matches!(r.state(), LocalState::Pending | LocalState::InProgress))
            .collect();
        if !unfinished.is_empty() {
            formatter.info("");
            formatter.info("Unfinished:");
            for record in unfinished {
                formatter.info(&format!(
                    "  {} {:>5.1}%  {}",
                    progress_bar(record.progress(), 10),
                    record.progress() * 100.0,
                    truncate_path(record.path().as_str(), PATH_WIDTH)
                ));
            }
        }

        let failed: Vec<&SyncRecord> = progress
            .records
            .iter()
            .filter(|r| r.state() == LocalState::Failed)
            .collect();
        if !failed.is_empty() {
            formatter.info("");
            formatter.error(&format!("{} file(s) failed:", failed.len()));
            for record in failed {
                let reason = record
                    .last_error()
                    .map(|e| format!("[{}] {}", e.kind, e.message))
                    .unwrap_or_else(|| "unknown error".to_string());
                formatter.info(&format!(
                    "  {}  {} (failed runs: {})",
                    truncate_path(record.path().as_str(), PATH_WIDTH),
                    reason,
                    record.failure_count()
                ));
            }
        }

        if self.all {
            formatter.info("");
            formatter.info("Complete:");
            for record in progress
                .records
                .iter()
                .filter(|r| r.state() == LocalState::Complete)
            {
                formatter.info(&format!(
                    "  {:>10}  {}",
                    format_bytes(record.size()),
                    record.path()
                ));
            }
        }
    }
}

/// Shorten a path to `max` characters, keeping its tail
fn truncate_path(path: &str, max: usize) -> String {
    let count = path.chars().count();
    if count <= max {
        return path.to_string();
    }
    let tail: String = path.chars().skip(count - max.saturating_sub(3)).collect();
    format!("...{tail}")
}
