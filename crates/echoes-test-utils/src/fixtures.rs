//! Pre-built test fixtures for common deployment scenarios.
//!
//! Provides factory functions that build graphs on top of a shared
//! [`ScriptedProvider`], with sensible defaults.

use std::sync::Arc;

use echoes_flow::component::{Component, ComponentKind};
use echoes_flow::deferred::Deferred;
use echoes_flow::graph::DependencyGraph;
use echoes_flow::policy::{RetryPolicy, Timeouts};
use echoes_flow::provider::{ProviderAction, ResourceSpec};
use echoes_flow::scheduler::Scheduler;
use echoes_flow::secrets::StaticSecrets;
use serde_json::json;

use crate::provider::ScriptedProvider;

/// Test context with a shared provider and secret table.
pub struct TestContext {
    /// Shared scripted provider.
    pub provider: Arc<ScriptedProvider>,
    /// Secrets handed to provider actions.
    pub secrets: Arc<StaticSecrets>,
}

impl TestContext {
    /// Creates a context with no secrets.
    #[must_use]
    pub fn new() -> Self {
        Self::with_secrets(StaticSecrets::new())
    }

    /// Creates a context with the given secrets.
    #[must_use]
    pub fn with_secrets(secrets: StaticSecrets) -> Self {
        Self {
            provider: Arc::new(ScriptedProvider::new()),
            secrets: Arc::new(secrets),
        }
    }

    /// A provider action for `resource_type` that never retries.
    #[must_use]
    pub fn action(&self, resource_type: &str) -> ProviderAction {
        ProviderAction::new(
            ResourceSpec::new(resource_type),
            self.provider.clone(),
            self.secrets.clone(),
        )
    }

    /// A component backed by [`TestContext::action`], with retries disabled.
    #[must_use]
    pub fn component(&self, name: &str, kind: ComponentKind, resource_type: &str) -> Component {
        Component::new(name, kind, Arc::new(self.action(resource_type)))
            .with_retry(RetryPolicy::none())
    }

    /// A fresh scheduler.
    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory for creating test graphs.
pub struct StackFactory;

impl StackFactory {
    /// `main-network -> app-cluster -> app-addons`, with the cluster's
    /// 45 minute timeout and the cluster reading the network's `vpc_id`.
    #[must_use]
    pub fn infrastructure_chain(ctx: &TestContext) -> DependencyGraph {
        ctx.provider.set_outputs(
            "main-network",
            [("vpc_id", json!("vpc-123")), ("vpc_name", json!("main-vpc"))],
        );
        ctx.provider.set_outputs(
            "app-cluster",
            [
                ("cluster_name", json!("app-cluster")),
                ("endpoint", json!("10.0.0.2")),
            ],
        );

        let mut graph = DependencyGraph::new();
        graph
            .add_component(
                ctx.component("main-network", ComponentKind::Network, "gcp:compute:Network")
                    .with_timeouts(Timeouts::minutes(30)),
            )
            .expect("network");
        graph
            .add_component(
                ctx.component("app-cluster", ComponentKind::Cluster, "gcp:container:Cluster")
                    .input("vpc_id", Deferred::output("main-network", "vpc_id"))
                    .with_timeouts(Timeouts::minutes(45))
                    .delete_before_replace(),
            )
            .expect("cluster");
        graph
            .add_component(
                ctx.component("app-addons", ComponentKind::AddonSet, "helm:Release")
                    .input("cluster", Deferred::output("app-cluster", "cluster_name"))
                    .with_timeouts(Timeouts::minutes(20)),
            )
            .expect("addons");
        graph
            .export("vpc_id", Deferred::output("main-network", "vpc_id"))
            .expect("export");
        graph
            .export(
                "app_cluster_endpoint",
                Deferred::output("app-cluster", "endpoint"),
            )
            .expect("export");
        graph
    }

    /// Two independent branches joining at `app`:
    /// `network -> {app, monitoring}` and `postgres -> app`.
    ///
    /// `postgres` requires the `POSTGRES_PASSWORD` secret and publishes a
    /// sensitive `password` output.
    #[must_use]
    pub fn two_branch_workload(ctx: &TestContext) -> DependencyGraph {
        ctx.provider.set_outputs(
            "postgres",
            [
                ("secret_name", json!("postgres-credentials")),
                ("password", json!("s3cr3t")),
            ],
        );
        ctx.provider
            .set_outputs("app", [("url", json!("http://app.internal"))]);
        ctx.provider
            .set_outputs("monitoring", [("url", json!("http://grafana.internal"))]);

        let postgres = ctx
            .action("k8s:helm:Postgres")
            .require_secret("POSTGRES_PASSWORD")
            .sensitive_output("password");

        let mut graph = DependencyGraph::new();
        graph
            .add_component(ctx.component(
                "network",
                ComponentKind::NetworkPolicy,
                "k8s:NetworkPolicy",
            ))
            .expect("network");
        graph
            .add_component(
                Component::new("postgres", ComponentKind::Database, Arc::new(postgres))
                    .with_retry(RetryPolicy::none()),
            )
            .expect("postgres");
        graph
            .add_component(
                ctx.component("app", ComponentKind::AppDeployment, "k8s:Deployment")
                    .depends_on("network")
                    .input("secret_name", Deferred::output("postgres", "secret_name")),
            )
            .expect("app");
        graph
            .add_component(
                ctx.component(
                    "monitoring",
                    ComponentKind::MonitoringDeployment,
                    "k8s:Deployment",
                )
                .depends_on("network"),
            )
            .expect("monitoring");
        graph
            .export("app_url", Deferred::output("app", "url"))
            .expect("export");
        graph
            .export("metrics_url", Deferred::output("monitoring", "url"))
            .expect("export");
        graph
    }

    /// `a` and `b` are independent; `c` depends on both.
    #[must_use]
    pub fn fan_in(ctx: &TestContext) -> DependencyGraph {
        let kind = || ComponentKind::Custom("test".into());
        let mut graph = DependencyGraph::new();
        graph
            .add_component(ctx.component("a", kind(), "test:Resource"))
            .expect("a");
        graph
            .add_component(ctx.component("b", kind(), "test:Resource"))
            .expect("b");
        graph
            .add_component(
                ctx.component("c", kind(), "test:Resource")
                    .depends_on("a")
                    .depends_on("b"),
            )
            .expect("c");
        graph
    }
}
