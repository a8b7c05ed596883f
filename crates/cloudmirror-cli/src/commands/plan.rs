//! Plan command - Preview a run without transferring anything
//!
//! Lists the source, diffs it against the progress store and prints what
//! `cloudmirror run` would do. Neither the store nor the mirror is touched.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use cloudmirror_core::domain::Decision;
use cloudmirror_sync::diff::SyncPlan;

use super::{CliContext, Session};
use crate::output::{format_bytes, get_formatter, plural, OutputFormatter};

/// Preview the transfers a run would perform
#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Source directory to mirror
    pub source: PathBuf,

    /// List every planned task
    #[arg(long)]
    pub details: bool,
}

impl PlanCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let session = Session::with_source(ctx, &self.source).await?;
        let plan = session.plan().await?;

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::to_value(&plan)?);
            return Ok(());
        }

        print_plan(&plan, self.details, &*formatter);
        Ok(())
    }
}

fn print_plan(plan: &SyncPlan, details: bool, formatter: &dyn OutputFormatter) {
    if plan.is_empty() {
        formatter.success("Mirror is up to date");
    } else {
        formatter.success(&format!(
            "{} to transfer ({})",
            plural(plan.tasks.len() as u64, "task"),
            format_bytes(plan.total_bytes())
        ));
    }
    formatter.info(&format!(
        "new: {}  modified: {}  unchanged: {}  filtered: {}",
        plan.count(Decision::New),
        plan.count(Decision::Modified),
        plan.unchanged,
        plan.filtered.len()
    ));

    if details {
        for task in &plan.tasks {
            let kind = if task.is_directory() { "dir " } else { "file" };
            formatter.info(&format!(
                "{:<9} {} {} ({})",
                task.decision.name(),
                kind,
                task.entry.path,
                format_bytes(task.entry.size)
            ));
        }
    }

    if !plan.orphans.is_empty() {
        formatter.warn(&format!(
            "{} no longer in the source; see 'cloudmirror orphans'",
            plural(plan.orphans.len() as u64, "record")
        ));
    }
    for conflict in &plan.conflicts {
        formatter.warn(&format!(
            "{} claimed by {} remote entries; not transferred",
            conflict.path,
            conflict.entries.len()
        ));
    }
    for failed in &plan.permanently_failed {
        let reason = failed
            .last_error
            .as_ref()
            .map(|e| format!("{}: {}", e.kind, e.message))
            .unwrap_or_else(|| "unknown error".to_string());
        formatter.warn(&format!(
            "{} skipped after {} failed runs ({})",
            failed.entry.path,
            failed.failure_count,
            reason
        ));
    }
}
