//! Up command - run a stack through the scheduler.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use echoes_flow::report::ExecutionReport;
use echoes_flow::scheduler::Scheduler;
use owo_colors::OwoColorize;
use tracing::info;

use super::StackArgs;
use crate::{Config, OutputFormat};

/// Arguments for the up command.
#[derive(Debug, Args)]
pub struct UpArgs {
    /// Stack selection.
    #[command(flatten)]
    pub stack: StackArgs,

    /// Also write the JSON report to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Execute the up command.
///
/// Resources are planned by the dry-run provider; secrets come from the
/// environment.
///
/// # Errors
///
/// Returns an error if settings cannot be loaded, the stack is invalid, or
/// the run fails. A failed run is printed before the error is returned.
pub async fn execute(args: UpArgs, config: &Config) -> Result<()> {
    let settings = config.load_settings()?;
    let graph = args.stack.build(&settings)?;

    let scheduler = Scheduler::new().with_max_concurrency(config.max_concurrency);
    let report = scheduler.run(&graph).await?;
    info!(run_id = %report.run_id, outcome = %report.outcome, "run finished");

    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    print_report(&report, config)?;

    if !report.is_success() {
        let reason = report
            .failure
            .as_ref()
            .map_or_else(|| "unknown failure".to_string(), |f| f.error.to_string());
        anyhow::bail!("Deployment failed: {reason}");
    }
    Ok(())
}

fn print_report(report: &ExecutionReport, config: &Config) -> Result<()> {
    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct ComponentRow {
                #[tabled(rename = "Component")]
                component: String,
                #[tabled(rename = "State")]
                state: String,
                #[tabled(rename = "Attempts")]
                attempts: u32,
                #[tabled(rename = "Handle")]
                handle: String,
                #[tabled(rename = "Error")]
                error: String,
            }

            let rows: Vec<_> = report
                .components
                .iter()
                .map(|c| ComponentRow {
                    component: c.component.clone(),
                    state: c.state.to_string(),
                    attempts: c.attempts,
                    handle: c.handle.as_ref().map_or("-".into(), ToString::to_string),
                    error: c.error.as_ref().map_or("-".into(), ToString::to_string),
                })
                .collect();
            println!("{}", Table::new(rows));
            println!("Outcome: {}", format_state_colored(&report.outcome.to_string()));
        }
        OutputFormat::Text => {
            println!("Run: {}", report.run_id);
            println!("Outcome: {}", format_state_colored(&report.outcome.to_string()));
            println!();
            for component in &report.components {
                println!(
                    "  {} {}",
                    component.component,
                    format_state_colored(&component.state.to_string())
                );
                if let Some(error) = &component.error {
                    println!("    Error: {}", error.red());
                }
            }
            if !report.rollback.is_empty() {
                println!();
                println!("Rollback:");
                for entry in &report.rollback {
                    println!("  {} {}", entry.component, entry.outcome);
                }
            }
            if !report.exports.is_empty() {
                println!();
                println!("Exports:");
                for (name, value) in &report.exports {
                    println!("  {name} = {value}");
                }
            }
        }
    }
    Ok(())
}

fn format_state_colored(state: &str) -> String {
    match state {
        "SUCCEEDED" | "APPLIED" => state.green().to_string(),
        "FAILED" | "ROLLBACK_FAILED" => state.red().to_string(),
        "ROLLED_BACK" => state.yellow().to_string(),
        "NOT_STARTED" => state.dimmed().to_string(),
        _ => state.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::StackKind;

    const SETTINGS: &str = include_str!("../../../echoes-infra/tests/fixtures/settings.yaml");

    fn config_for(dir: &tempfile::TempDir) -> Config {
        let settings = dir.path().join("settings.yaml");
        std::fs::write(&settings, SETTINGS).unwrap();
        Config {
            settings,
            max_concurrency: 1,
            format: OutputFormat::Json,
        }
    }

    #[tokio::test]
    async fn test_workload_dry_run_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&dir);
        let report_path = dir.path().join("report.json");
        let args = UpArgs {
            stack: StackArgs {
                stack: StackKind::Workload,
                cluster_endpoint: Some("34.1.2.3".into()),
                cluster_ca: Some("Q0E=".into()),
            },
            report: Some(report_path.clone()),
        };

        // POSTGRES_PASSWORD is unset, so postgres fails and the run errors.
        let err = execute(args, &config).await.unwrap_err();
        assert!(err.to_string().contains("Deployment failed"));

        let written: ExecutionReport =
            serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
        assert!(!written.is_success());
        assert_eq!(
            written.failure.unwrap().component.as_deref(),
            Some("postgres")
        );
    }

    #[test]
    fn test_state_colors_leave_text_intact() {
        assert!(format_state_colored("APPLIED").contains("APPLIED"));
        assert_eq!(format_state_colored("PENDING"), "PENDING");
    }
}
