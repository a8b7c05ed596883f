//! CloudMirror CLI - Command-line interface for CloudMirror
//!
//! Provides commands for:
//! - Previewing and running a mirror of a source directory
//! - Viewing transfer progress and the error log
//! - Listing and cleaning up orphans
//! - Inspecting configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;
mod source;

use cloudmirror_core::config::Config;
use commands::{
    clean::CleanCommand, completions::CompletionsCommand, config::ConfigCommand,
    errors::ErrorsCommand, orphans::OrphansCommand, plan::PlanCommand, run::RunCommand,
    status::StatusCommand, CliContext,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "cloudmirror",
    version,
    about = "Resumable, verified one-way mirror of a remote folder tree"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Preview what a run would transfer
    Plan(PlanCommand),
    /// Mirror a source directory into the sync root
    Run(RunCommand),
    /// Show per-file transfer progress
    Status(StatusCommand),
    /// List records whose remote entry is gone
    Orphans(OrphansCommand),
    /// Remove orphaned local copies and their records
    Clean(CleanCommand),
    /// Show recent transfer failures
    Errors(ErrorsCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

/// Log filter for the given verbosity, falling back to the configured level
fn log_directive(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        2 => "trace".to_string(),
        _ => "trace,sqlx=trace".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    // Setup tracing
    let directive = log_directive(cli.verbose, &config.logging.level);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let ctx = CliContext::new(format, config_path);

    match cli.command {
        Commands::Plan(cmd) => cmd.execute(&ctx).await,
        Commands::Run(cmd) => cmd.execute(&ctx).await,
        Commands::Status(cmd) => cmd.execute(&ctx).await,
        Commands::Orphans(cmd) => cmd.execute(&ctx).await,
        Commands::Clean(cmd) => cmd.execute(&ctx).await,
        Commands::Errors(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
        Commands::Completions(cmd) => cmd.execute(&ctx).await,
    }
}
