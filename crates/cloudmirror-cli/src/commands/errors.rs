//! Errors command - Show the failure log, newest first

use anyhow::{Context, Result};
use clap::Args;
use cloudmirror_core::ports::ErrorLogEntry;

use super::{CliContext, Session};
use crate::output::{get_formatter, OutputFormatter};

/// Show recent transfer failures
#[derive(Debug, Args)]
pub struct ErrorsCommand {
    /// Maximum number of entries to show
    #[arg(long, short = 'n', default_value_t = 20)]
    pub limit: u32,
}

impl ErrorsCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let session = Session::offline(ctx).await?;
        let entries = session
            .store
            .list_errors(self.limit)
            .await
            .context("Failed to read error log")?;

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::to_value(&entries)?);
            return Ok(());
        }

        print_entries(&entries, &*formatter);
        Ok(())
    }
}

fn print_entries(entries: &[ErrorLogEntry], formatter: &dyn OutputFormatter) {
    if entries.is_empty() {
        formatter.success("No failures recorded");
        return;
    }
    for entry in entries {
        formatter.info(&format!(
            "{}  {:<18} {} (attempt {}): {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.kind.to_string(),
            entry.path,
            entry.attempt_count,
            entry.message
        ));
    }
}
