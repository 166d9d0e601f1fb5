//! # echoes-infra
//!
//! The echoes deployment, expressed as dependency graphs.
//!
//! - **Settings**: One YAML document with every project, network, cluster
//!   and node pool parameter, validated on load
//! - **Kubeconfig**: GKE kubeconfig rendering for the add-on and workload
//!   components
//! - **Stacks**: The infrastructure stack (VPC, two clusters, add-ons) and
//!   the workload stack (policies, postgres, app, monitoring)
//! - **Dry run**: A provider that plans every resource without creating any
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use echoes_flow::scheduler::Scheduler;
//! use echoes_flow::secrets::EnvSecrets;
//! use echoes_infra::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let settings = Settings::load("settings.yaml")?;
//! let deps = StackDeps::new(Arc::new(DryRunProvider), Arc::new(EnvSecrets));
//! let graph = infrastructure_stack(&settings, &deps)?;
//!
//! let report = Scheduler::new().run(&graph).await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod dry_run;
pub mod error;
pub mod kubeconfig;
pub mod settings;
pub mod stack;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::dry_run::DryRunProvider;
    pub use crate::error::{Error, Result};
    pub use crate::kubeconfig::{Kubeconfig, create_kubeconfig};
    pub use crate::settings::Settings;
    pub use crate::stack::{ClusterAccess, StackDeps, infrastructure_stack, workload_stack};
}
