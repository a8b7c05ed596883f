//! Config command - View and validate CloudMirror configuration
//!
//! Provides the `cloudmirror config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Validates the configuration file and reports errors

use anyhow::{Context, Result};
use clap::Subcommand;
use cloudmirror_core::config::Config;
use tracing::info;

use super::CliContext;
use crate::output::get_formatter;

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(ctx),
            ConfigCommand::Validate => self.execute_validate(ctx),
        }
    }

    fn execute_show(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let config = ctx.load_config();

        info!(config_path = %ctx.config_path.display(), "Showing configuration");

        if ctx.format.is_json() {
            let json = serde_json::to_value(&config)
                .context("Failed to serialize configuration to JSON")?;
            formatter.print_json(&json);
        } else {
            formatter.success(&format!("Configuration ({})", ctx.config_path.display()));
            formatter.info("");
            let yaml = serde_yaml::to_string(&config)
                .context("Failed to serialize configuration to YAML")?;
            for line in yaml.lines() {
                formatter.info(line);
            }
        }
        Ok(())
    }

    fn execute_validate(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let path = &ctx.config_path;

        // Load explicitly so parse errors are reported instead of defaulted
        let config = if path.exists() {
            match Config::load(path) {
                Ok(config) => config,
                Err(e) => {
                    let message = format!("Failed to parse configuration: {e}");
                    if ctx.format.is_json() {
                        formatter.print_json(&serde_json::json!({
                            "valid": false,
                            "config_path": path.display().to_string(),
                            "errors": [message],
                        }));
                    } else {
                        formatter.error(&message);
                        formatter.info(&format!("File: {}", path.display()));
                    }
                    anyhow::bail!("Invalid configuration");
                }
            }
        } else {
            formatter.info(&format!(
                "Configuration file not found at {}; checking defaults",
                path.display()
            ));
            Config::default()
        };

        info!(config_path = %path.display(), "Validating configuration");
        let errors = config.validate();

        if ctx.format.is_json() {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            formatter.print_json(&serde_json::json!({
                "valid": errors.is_empty(),
                "config_path": path.display().to_string(),
                "errors": messages,
            }));
        } else if errors.is_empty() {
            formatter.success("Configuration is valid");
        } else {
            formatter.error(&format!("{} validation error(s):", errors.len()));
            for error in &errors {
                formatter.info(&format!("  {error}"));
            }
        }

        if !errors.is_empty() {
            anyhow::bail!("Invalid configuration");
        }
        Ok(())
    }
}
