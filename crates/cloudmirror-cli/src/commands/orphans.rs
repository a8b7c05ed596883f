//! Orphans command - List records whose remote entry is gone

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use cloudmirror_sync::diff::Orphan;

use super::{CliContext, Session};
use crate::output::{format_bytes, get_formatter, plural, OutputFormatter};

/// List records no longer present in the source
#[derive(Debug, Args)]
pub struct OrphansCommand {
    /// Source directory to compare against
    pub source: PathBuf,
}

impl OrphansCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let session = Session::with_source(ctx, &self.source).await?;
        let plan = session.plan().await?;

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::to_value(&plan.orphans)?);
            return Ok(());
        }

        if plan.orphans.is_empty() {
            formatter.success("No orphans");
            return Ok(());
        }
        formatter.warn(&format!(
            "{} no longer in the source:",
            plural(plan.orphans.len() as u64, "record")
        ));
        print_orphans(&plan.orphans, &*formatter);
        formatter.info("");
        formatter.info("Run 'cloudmirror clean <source> --yes' to remove them.");
        Ok(())
    }
}

pub(super) fn print_orphans(orphans: &[Orphan], formatter: &dyn OutputFormatter) {
    for orphan in orphans {
        let size = if orphan.entry.is_directory {
            "dir".to_string()
        } else {
            format_bytes(orphan.entry.size)
        };
        formatter.info(&format!(
            "{:<12} {:>10}  {}",
            orphan.state.name(),
            size,
            orphan.entry.path
        ));
    }
}
