//! Run command - Mirror a source directory into the sync root
//!
//! Provides the `cloudmirror run` CLI command which:
//! 1. Lists the source and plans the transfers
//! 2. Runs them with the configured (or overridden) concurrency and bandwidth
//! 3. Stops cleanly on Ctrl+C, keeping verified chunks for the next run
//! 4. Prints a summary of the run report

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use cloudmirror_sync::bandwidth::BandwidthCap;
use cloudmirror_sync::{RunOptions, SyncReport};
use tracing::info;

use super::{CliContext, Session};
use crate::output::{format_bytes, get_formatter, plural, OutputFormatter};

/// Mirror a source directory
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Source directory to mirror
    pub source: PathBuf,

    /// Number of files transferred at once
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub concurrency: Option<u64>,

    /// Bandwidth cap in KiB/s (0 for unlimited)
    #[arg(long)]
    pub bandwidth: Option<u64>,
}

impl RunCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let session = Session::with_source(ctx, &self.source).await?;

        let root = &session.engine.settings().root;
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("Failed to create sync root {}", root.display()))?;

        let plan = session.plan().await?;
        let options = self.options(&session);
        info!(
            tasks = plan.tasks.len(),
            bytes = plan.total_bytes(),
            concurrency = options.concurrency,
            "Starting run"
        );

        let cancel = session.engine.cancel_handle();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping after in-flight chunks");
                cancel.cancel();
            }
        });

        let result = session.engine.run_sync(&plan, options).await;
        watcher.abort();
        let report = result.context("Run failed")?;

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::to_value(&report)?);
        } else {
            print_report(&report, &*formatter);
        }

        if report.cancelled {
            anyhow::bail!("Run cancelled");
        }
        if report.counts.failed > 0 {
            anyhow::bail!("Run finished with {} failed", plural(report.counts.failed, "task"));
        }
        Ok(())
    }

    fn options(&self, session: &Session) -> RunOptions {
        let mut options = RunOptions::from_config(&session.config);
        if let Some(n) = self.concurrency {
            options = options.with_concurrency(usize::try_from(n).unwrap_or(usize::MAX));
        }
        if let Some(kbps) = self.bandwidth {
            options = options.with_bandwidth(BandwidthCap::from_kbps(
                kbps,
                session.config.bandwidth.burst_kb,
            ));
        }
        options
    }
}

fn print_report(report: &SyncReport, formatter: &dyn OutputFormatter) {
    let elapsed = (report.finished_at - report.started_at)
        .to_std()
        .unwrap_or_default();
    let summary = format!(
        "{} completed, {} transferred in {:.1}s",
        plural(report.counts.completed, "task"),
        format_bytes(report.bytes_transferred),
        elapsed.as_secs_f64()
    );
    if report.is_success() {
        formatter.success(&summary);
    } else {
        formatter.info(&summary);
    }

    if report.counts.skipped_by_filter > 0 {
        formatter.info(&format!(
            "{} skipped by filters",
            plural(report.counts.skipped_by_filter, "item")
        ));
    }
    formatter.info(&format!(
        "Mirror holds {} of verified data",
        format_bytes(report.bytes_completed_total)
    ));

    for failure in &report.failures {
        formatter.error(&format!(
            "{}: {} ({})",
            failure.path, failure.message, failure.kind
        ));
    }
    if report.auth_expired {
        formatter.warn("Credentials expired; refresh them and run again");
    }
    if report.cancelled {
        formatter.warn(&format!(
            "Run cancelled; {} will resume next time",
            plural(report.counts.cancelled, "task")
        ));
    }
    if !report.orphans.is_empty() {
        formatter.warn(&format!(
            "{} no longer in the source; run 'cloudmirror clean' to remove",
            plural(report.orphans.len() as u64, "record")
        ));
    }
    for conflict in &report.conflicts {
        formatter.warn(&format!(
            "{} is claimed by several remote entries; left untouched",
            conflict.path
        ));
    }
    if !report.permanently_failed.is_empty() {
        formatter.warn(&format!(
            "{} skipped after repeated failures; see 'cloudmirror errors'",
            plural(report.permanently_failed.len() as u64, "file")
        ));
    }
}
