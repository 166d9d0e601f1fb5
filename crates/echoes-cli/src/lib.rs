//! # echoes-cli
//!
//! Command-line interface for the echoes stacks.
//!
//! ## Commands
//!
//! - `echoes plan` - Show the creation and destruction order of a stack
//! - `echoes up` - Run a stack through the scheduler
//! - `echoes kubeconfig` - Render the kubeconfig of a cluster
//!
//! ## Configuration
//!
//! The CLI uses environment variables or command-line flags for settings:
//!
//! - `ECHOES_SETTINGS` - Settings file (default: `settings.yaml`)
//! - `ECHOES_MAX_CONCURRENCY` - Components applied at once (default: unbounded)
//! - `ECHOES_LOG_JSON` - Emit JSON logs
//! - `RUST_LOG` - Log filter

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use echoes_core::LogFormat;
use echoes_infra::settings::Settings;

/// echoes - dependency-ordered deployment of the echoes stacks.
#[derive(Debug, Parser)]
#[command(name = "echoes")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file.
    #[arg(long, env = "ECHOES_SETTINGS", default_value = "settings.yaml")]
    pub settings: PathBuf,

    /// Maximum components applied at once; 0 means unbounded.
    #[arg(long, env = "ECHOES_MAX_CONCURRENCY", default_value = "0")]
    pub max_concurrency: usize,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Emit logs as JSON lines.
    #[arg(long, env = "ECHOES_LOG_JSON")]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        Config {
            settings: self.settings.clone(),
            max_concurrency: self.max_concurrency,
            format: self.format.clone(),
        }
    }

    /// Log format selected by the flags.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        if self.log_json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the creation and destruction order of a stack.
    Plan(commands::plan::PlanArgs),
    /// Run a stack through the scheduler.
    Up(commands::up::UpArgs),
    /// Render the kubeconfig of a cluster.
    Kubeconfig(commands::kubeconfig::KubeconfigArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
    /// Table output.
    Table,
}

/// CLI configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Settings file.
    pub settings: PathBuf,
    /// Maximum components applied at once; 0 means unbounded.
    pub max_concurrency: usize,
    /// Output format.
    pub format: OutputFormat,
}

impl Config {
    /// Loads and validates the settings file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, malformed, or invalid.
    pub fn load_settings(&self) -> Result<Settings> {
        Settings::load(&self.settings)
            .with_context(|| format!("Failed to load settings from {}", self.settings.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_config_from_flags() {
        let cli = Cli::parse_from([
            "echoes",
            "--settings",
            "/etc/echoes/settings.yaml",
            "--max-concurrency",
            "2",
            "--format",
            "json",
            "plan",
            "--stack",
            "infrastructure",
        ]);

        let config = cli.config();
        assert_eq!(config.settings, PathBuf::from("/etc/echoes/settings.yaml"));
        assert_eq!(config.max_concurrency, 2);
        assert!(matches!(config.format, OutputFormat::Json));
        assert_eq!(cli.log_format(), LogFormat::Pretty);
    }

    #[test]
    fn test_missing_settings_file_has_context() {
        let config = Config {
            settings: PathBuf::from("/nonexistent/echoes.yaml"),
            ..Config::default()
        };
        let err = config.load_settings().unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/echoes.yaml"));
    }
}
