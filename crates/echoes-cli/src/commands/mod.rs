//! CLI command implementations.

pub mod kubeconfig;
pub mod plan;
pub mod up;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use echoes_flow::graph::DependencyGraph;
use echoes_flow::secrets::EnvSecrets;
use echoes_infra::dry_run::DryRunProvider;
use echoes_infra::settings::Settings;
use echoes_infra::stack::{ClusterAccess, StackDeps, infrastructure_stack, workload_stack};

/// Which stack a command operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StackKind {
    /// VPC, clusters and add-ons.
    Infrastructure,
    /// Policies, postgres, app and monitoring on the app cluster.
    Workload,
}

/// Stack selection shared by `plan` and `up`.
#[derive(Debug, Args)]
pub struct StackArgs {
    /// Stack to build.
    #[arg(long, value_enum, default_value = "infrastructure")]
    pub stack: StackKind,

    /// App cluster API endpoint (workload stack only).
    #[arg(long, env = "ECHOES_CLUSTER_ENDPOINT")]
    pub cluster_endpoint: Option<String>,

    /// Base64 app cluster CA (workload stack only).
    #[arg(long, env = "ECHOES_CLUSTER_CA", hide_env_values = true)]
    pub cluster_ca: Option<String>,
}

impl StackArgs {
    /// Builds the selected stack against the dry-run provider and
    /// environment secrets.
    ///
    /// # Errors
    ///
    /// Returns an error if workload cluster details are missing or the graph
    /// cannot be assembled.
    pub fn build(&self, settings: &Settings) -> Result<DependencyGraph> {
        let deps = StackDeps::new(Arc::new(DryRunProvider), Arc::new(EnvSecrets));
        let graph = match self.stack {
            StackKind::Infrastructure => infrastructure_stack(settings, &deps)?,
            StackKind::Workload => {
                let access = ClusterAccess {
                    cluster_name: settings.app_cluster.name.clone(),
                    endpoint: self.cluster_endpoint.clone().context(
                        "Cluster endpoint is required. \
                         Set ECHOES_CLUSTER_ENDPOINT or use --cluster-endpoint",
                    )?,
                    cluster_ca: self.cluster_ca.clone().context(
                        "Cluster CA is required. Set ECHOES_CLUSTER_CA or use --cluster-ca",
                    )?,
                };
                workload_stack(settings, &access, &deps)?
            }
        };
        Ok(graph)
    }
}
