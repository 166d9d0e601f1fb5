//! # echoes-flow
//!
//! Dependency-ordered deployment orchestration for the echoes stacks.
//!
//! This crate implements the orchestration core, providing:
//!
//! - **Dependency Graph**: Components, explicit and input-derived edges,
//!   cycle detection with the offending path, deterministic ordering
//! - **Deferred Values**: Lazily resolved, memoized outputs that flow from a
//!   producing component into its consumers
//! - **Scheduling**: Concurrent execution of independent branches with
//!   per-phase deadlines, retry of transient provider failures, and
//!   delete-before-replace semantics
//! - **Rollback**: Best-effort destruction of everything a failed run
//!   created, in reverse dependency order
//! - **Reporting**: A serializable [`ExecutionReport`](report::ExecutionReport)
//!   per run
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use echoes_flow::prelude::*;
//! use echoes_flow::provider::{ProviderAction, ResourceProvider, ResourceSpec};
//! use echoes_flow::secrets::EnvSecrets;
//!
//! # async fn deploy(provider: Arc<dyn ResourceProvider>) -> Result<()> {
//! let secrets = Arc::new(EnvSecrets);
//! let action = |resource_type: &str| {
//!     Arc::new(ProviderAction::new(
//!         ResourceSpec::new(resource_type),
//!         provider.clone(),
//!         secrets.clone(),
//!     ))
//! };
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_component(
//!     Component::new("main-network", ComponentKind::Network, action("gcp:compute:Network"))
//!         .with_timeouts(Timeouts::minutes(30)),
//! )?;
//! graph.add_component(
//!     Component::new("app-cluster", ComponentKind::Cluster, action("gcp:container:Cluster"))
//!         .input("network", Deferred::output("main-network", "vpc_id"))
//!         .with_timeouts(Timeouts::minutes(45))
//!         .delete_before_replace(),
//! )?;
//! graph.export("vpc_id", Deferred::output("main-network", "vpc_id"))?;
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

// Internal modules - not exposed in public API.
pub(crate) mod dag;

pub mod change;
pub mod component;
pub mod deferred;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod outputs;
pub mod policy;
pub mod provider;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod secrets;
pub mod state;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::change::{ChangeDetector, ChangeKind, FreshDeployment, PlannedChange, PriorState};
    pub use crate::component::{
        AppliedResource, ApplyContext, Component, ComponentAction, ComponentKind, DestroyContext,
        Outputs, ResolvedInputs, ResourceHandle,
    };
    pub use crate::deferred::{Deferred, OutputRef};
    pub use crate::error::{Error, ErrorCode, Result};
    pub use crate::graph::DependencyGraph;
    pub use crate::metrics::DeployMetrics;
    pub use crate::outputs::OutputRegistry;
    pub use crate::policy::{DeletionPolicy, Phase, RetryPolicy, Timeouts};
    pub use crate::report::{ExecutionReport, RunOutcome};
    pub use crate::scheduler::Scheduler;
    pub use crate::state::NodeState;
}
