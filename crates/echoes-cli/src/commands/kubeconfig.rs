//! Kubeconfig command - render the kubeconfig of a GKE cluster.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use echoes_infra::kubeconfig::Kubeconfig;
use echoes_infra::settings::Settings;

use crate::{Config, OutputFormat};

/// Which cluster from the settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClusterChoice {
    /// The application cluster.
    App,
    /// The monitoring cluster.
    Monitoring,
}

/// Arguments for the kubeconfig command.
#[derive(Debug, Args)]
pub struct KubeconfigArgs {
    /// Cluster to render.
    #[arg(long, value_enum, default_value = "app")]
    pub cluster: ClusterChoice,

    /// API server address, without scheme.
    #[arg(long, env = "ECHOES_CLUSTER_ENDPOINT")]
    pub endpoint: String,

    /// Base64 cluster CA.
    #[arg(long, env = "ECHOES_CLUSTER_CA", hide_env_values = true)]
    pub cluster_ca: String,

    /// Write to this file instead of stdout.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

/// Builds the kubeconfig for the chosen cluster.
#[must_use]
pub fn build(args: &KubeconfigArgs, settings: &Settings) -> Kubeconfig {
    let cluster = match args.cluster {
        ClusterChoice::App => &settings.app_cluster,
        ClusterChoice::Monitoring => &settings.monitoring_cluster,
    };
    Kubeconfig::for_gke(
        &cluster.name,
        &args.endpoint,
        &args.cluster_ca,
        &settings.project.id,
        &cluster.zone,
    )
}

/// Execute the kubeconfig command.
///
/// # Errors
///
/// Returns an error if settings cannot be loaded or the output cannot be
/// written.
pub fn execute(args: &KubeconfigArgs, config: &Config) -> Result<()> {
    let settings = config.load_settings()?;
    let kubeconfig = build(args, &settings);

    let rendered = match config.format {
        OutputFormat::Json => serde_json::to_string_pretty(&kubeconfig)?,
        OutputFormat::Text | OutputFormat::Table => kubeconfig.to_yaml()?,
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("Failed to write kubeconfig to {}", path.display()))?;
            eprintln!("Wrote kubeconfig for {} to {}", kubeconfig.current_context, path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
