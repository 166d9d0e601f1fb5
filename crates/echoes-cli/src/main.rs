//! echoes CLI - plan and deploy the echoes stacks.
//!
//! The main entry point for the `echoes` binary.

use anyhow::Result;
use clap::Parser;

use echoes_cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    echoes_core::init_logging(cli.log_format());
    let config = cli.config();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Plan(args) => echoes_cli::commands::plan::execute(&args, &config),
            Commands::Up(args) => echoes_cli::commands::up::execute(args, &config).await,
            Commands::Kubeconfig(args) => {
                echoes_cli::commands::kubeconfig::execute(&args, &config)
            }
        }
    })
}
