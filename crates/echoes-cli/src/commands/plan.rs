//! Plan command - show creation and destruction order without applying.

use anyhow::Result;
use clap::Args;
use echoes_flow::graph::DependencyGraph;
use serde::Serialize;
use tabled::Tabled;

use super::StackArgs;
use crate::{Config, OutputFormat};

/// Arguments for the plan command.
#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Stack selection.
    #[command(flatten)]
    pub stack: StackArgs,
}

/// One component in creation order.
#[derive(Debug, Serialize, Tabled)]
pub struct PlanEntry {
    /// Position in creation order, from 1.
    #[tabled(rename = "#")]
    pub step: usize,
    /// Component name.
    #[tabled(rename = "Component")]
    pub component: String,
    /// Component kind.
    #[tabled(rename = "Kind")]
    pub kind: String,
    /// Direct dependencies.
    #[tabled(rename = "Depends On", display_with = "display_list")]
    pub depends_on: Vec<String>,
    /// Create deadline.
    #[tabled(rename = "Create Timeout")]
    pub create_timeout: String,
    /// Whether replacements destroy the old resource first.
    #[tabled(rename = "Delete Before Replace")]
    pub delete_before_replace: bool,
}

#[allow(clippy::ptr_arg)]
fn display_list(items: &Vec<String>) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

/// Creation order with dependencies and deadlines.
///
/// # Errors
///
/// Returns an error if the graph is invalid.
pub fn plan_entries(graph: &DependencyGraph) -> Result<Vec<PlanEntry>> {
    let mut entries = Vec::with_capacity(graph.len());
    for (index, name) in graph.topological_order()?.into_iter().enumerate() {
        let Some(component) = graph.component(&name) else {
            anyhow::bail!("Ordered component {name} is not registered");
        };
        entries.push(PlanEntry {
            step: index + 1,
            kind: component.kind().as_str().to_string(),
            depends_on: graph.dependencies_of(&name)?,
            create_timeout: humantime::format_duration(component.timeouts().create).to_string(),
            delete_before_replace: component.deletion_policy().delete_before_replace,
            component: name,
        });
    }
    Ok(entries)
}

/// Execute the plan command.
///
/// # Errors
///
/// Returns an error if settings cannot be loaded or the stack is invalid.
pub fn execute(args: &PlanArgs, config: &Config) -> Result<()> {
    let settings = config.load_settings()?;
    let graph = args.stack.build(&settings)?;
    let entries = plan_entries(&graph)?;
    let destroy_order = graph.destroy_order()?;
    let exports: Vec<&str> = graph.exports().iter().map(|(name, _)| name.as_str()).collect();

    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "components": entries,
                    "destroyOrder": destroy_order,
                    "exports": exports,
                }))?
            );
        }
        OutputFormat::Table => {
            println!("{}", tabled::Table::new(&entries));
            println!();
            println!("Destroy order: {}", destroy_order.join(" -> "));
        }
        OutputFormat::Text => {
            println!("Creation order:");
            for entry in &entries {
                println!(
                    "  {}. {} ({}, timeout {})",
                    entry.step, entry.component, entry.kind, entry.create_timeout
                );
                if !entry.depends_on.is_empty() {
                    println!("       after {}", entry.depends_on.join(", "));
                }
            }
            println!();
            println!("Destroy order: {}", destroy_order.join(" -> "));
            if !exports.is_empty() {
                println!("Exports: {}", exports.join(", "));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::StackKind;
    use echoes_infra::settings::Settings;

    const SETTINGS: &str = include_str!("../../../echoes-infra/tests/fixtures/settings.yaml");

    #[test]
    fn test_plan_args_parsing() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            args: PlanArgs,
        }

        let cli = TestCli::parse_from([
            "test",
            "--stack",
            "workload",
            "--cluster-endpoint",
            "34.1.2.3",
            "--cluster-ca",
            "Q0E=",
        ]);
        assert_eq!(cli.args.stack.stack, StackKind::Workload);
        assert_eq!(cli.args.stack.cluster_endpoint.as_deref(), Some("34.1.2.3"));
    }

    #[test]
    fn test_plan_entries_follow_dependencies() {
        let settings = Settings::from_yaml(SETTINGS).unwrap();
        let args = StackArgs {
            stack: StackKind::Infrastructure,
            cluster_endpoint: None,
            cluster_ca: None,
        };
        let graph = args.build(&settings).unwrap();

        let entries = plan_entries(&graph).unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].component, "main-network");
        assert_eq!(entries[0].create_timeout, "30m");
        assert!(entries.iter().all(|e| e.delete_before_replace));

        let addons = entries.iter().find(|e| e.component == "app-addons").unwrap();
        assert_eq!(addons.kind, "addon_set");
        assert_eq!(addons.depends_on, vec!["main-network", "app-cluster"]);
    }

    #[test]
    fn test_workload_requires_cluster_details() {
        let settings = Settings::from_yaml(SETTINGS).unwrap();
        let args = StackArgs {
            stack: StackKind::Workload,
            cluster_endpoint: Some("34.1.2.3".into()),
            cluster_ca: None,
        };
        let err = args.build(&settings).unwrap_err();
        assert!(err.to_string().contains("ECHOES_CLUSTER_CA"));
    }
}
