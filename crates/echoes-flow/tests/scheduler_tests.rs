//! Scheduler behavior: ordering, deadlines, retries, replacement and rollback.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use echoes_flow::prelude::*;
use echoes_flow::provider::ProviderError;
use echoes_flow::report::RollbackOutcome;

type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    /// Fails with a transient provider error this many times, then succeeds.
    FailTransiently(u32),
    /// Never completes.
    Hang,
    /// Succeeds after sleeping.
    Sleep(Duration),
}

#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

struct Scripted {
    behavior: Behavior,
    destroy_fails: bool,
    outputs: Outputs,
    calls: AtomicU32,
    journal: Journal,
    seen_inputs: Mutex<Option<ResolvedInputs>>,
    gauge: Option<Arc<Gauge>>,
}

impl Scripted {
    fn new(behavior: Behavior, journal: &Journal) -> Self {
        Self {
            behavior,
            destroy_fails: false,
            outputs: Outputs::new(),
            calls: AtomicU32::new(0),
            journal: journal.clone(),
            seen_inputs: Mutex::new(None),
            gauge: None,
        }
    }

    fn outputs(mut self, outputs: Outputs) -> Self {
        self.outputs = outputs;
        self
    }

    fn failing_destroy(mut self) -> Self {
        self.destroy_fails = true;
        self
    }

    fn gauge(mut self, gauge: &Arc<Gauge>) -> Self {
        self.gauge = Some(gauge.clone());
        self
    }
}

#[async_trait]
impl ComponentAction for Scripted {
    async fn apply(&self, ctx: &ApplyContext) -> Result<AppliedResource> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{}", ctx.phase, ctx.component));
        *self.seen_inputs.lock().unwrap() = Some(ctx.inputs.clone());

        let created = || {
            AppliedResource::new(
                ResourceHandle::new(format!("{}-{call}", ctx.component)),
                self.outputs.clone(),
            )
        };
        match self.behavior {
            Behavior::Succeed => Ok(created()),
            Behavior::Fail => Err(Error::provider(
                &ctx.component,
                ProviderError::new("quota exceeded"),
            )),
            Behavior::FailTransiently(n) if call <= n => Err(Error::provider(
                &ctx.component,
                ProviderError::transient("rate limited"),
            )),
            Behavior::FailTransiently(_) => Ok(created()),
            Behavior::Hang => std::future::pending().await,
            Behavior::Sleep(delay) => {
                if let Some(gauge) = &self.gauge {
                    let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
                    gauge.peak.fetch_max(now, Ordering::SeqCst);
                }
                tokio::time::sleep(delay).await;
                if let Some(gauge) = &self.gauge {
                    gauge.current.fetch_sub(1, Ordering::SeqCst);
                }
                Ok(created())
            }
        }
    }

    async fn destroy(&self, ctx: &DestroyContext) -> Result<()> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("delete:{}:{}", ctx.component, ctx.handle));
        if self.destroy_fails {
            return Err(Error::provider(
                &ctx.component,
                ProviderError::new("resource is in use"),
            ));
        }
        Ok(())
    }
}

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

#[tokio::test]
async fn outputs_flow_into_dependents_in_order() {
    let log = journal();
    let cluster = Arc::new(Scripted::new(Behavior::Succeed, &log).outputs(
        Outputs::new().with("endpoint", "https://10.0.0.2"),
    ));

    let mut graph = DependencyGraph::new();
    graph
        .add_component(Component::new(
            "main-network",
            ComponentKind::Network,
            Arc::new(
                Scripted::new(Behavior::Succeed, &log)
                    .outputs(Outputs::new().with("vpc_id", "vpc-123")),
            ),
        ))
        .unwrap();
    graph
        .add_component(
            Component::new("app-cluster", ComponentKind::Cluster, cluster.clone())
                .input("network", Deferred::output("main-network", "vpc_id")),
        )
        .unwrap();
    graph
        .export("cluster_endpoint", Deferred::output("app-cluster", "endpoint"))
        .unwrap();

    let report = Scheduler::new().run(&graph).await.unwrap();

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(
        entries(&log),
        vec!["create:main-network", "create:app-cluster"]
    );
    let seen = cluster.seen_inputs.lock().unwrap().clone().unwrap();
    assert_eq!(seen.get_str("network").unwrap(), "vpc-123");
    assert_eq!(report.exports["cluster_endpoint"], json!("https://10.0.0.2"));
    assert_eq!(report.state_of("app-cluster"), Some(NodeState::Applied));
    assert_eq!(
        report.component("app-cluster").unwrap().handle,
        Some(ResourceHandle::new("app-cluster-1"))
    );
    assert!(report.rollback.is_empty());
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_component_and_rolls_back_upstream() {
    let log = journal();
    let mut graph = DependencyGraph::new();
    graph
        .add_component(Component::new(
            "main-network",
            ComponentKind::Network,
            Arc::new(Scripted::new(Behavior::Succeed, &log)),
        ))
        .unwrap();
    graph
        .add_component(
            Component::new(
                "app-cluster",
                ComponentKind::Cluster,
                Arc::new(Scripted::new(Behavior::Hang, &log)),
            )
            .depends_on("main-network")
            .with_timeouts(Timeouts::minutes(45)),
        )
        .unwrap();
    graph
        .add_component(
            Component::new(
                "app-addons",
                ComponentKind::AddonSet,
                Arc::new(Scripted::new(Behavior::Succeed, &log)),
            )
            .depends_on("app-cluster"),
        )
        .unwrap();

    let started = tokio::time::Instant::now();
    let report = Scheduler::new().run(&graph).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(45 * 60));
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.state_of("main-network"), Some(NodeState::RolledBack));
    assert_eq!(report.state_of("app-cluster"), Some(NodeState::Failed));
    assert_eq!(report.state_of("app-addons"), Some(NodeState::NotStarted));

    let error = report.component("app-cluster").unwrap().error.clone().unwrap();
    assert_eq!(error.code, ErrorCode::Timeout);
    assert_eq!(error.phase, Some(Phase::Create));

    let summary = report.summary();
    assert!(summary.contains("component 'app-cluster' failed during create"), "{summary}");
    assert!(summary.contains("45m"), "{summary}");
    assert!(summary.contains("not started: app-addons"), "{summary}");
    assert!(summary.contains("main-network: destroyed"), "{summary}");

    assert_eq!(
        entries(&log),
        vec![
            "create:main-network",
            "create:app-cluster",
            "delete:main-network:main-network-1"
        ]
    );
}

#[tokio::test]
async fn failed_branch_blocks_join_and_rolls_back_sibling() {
    let log = journal();
    let join = Arc::new(Scripted::new(Behavior::Succeed, &log));

    let mut graph = DependencyGraph::new();
    graph
        .add_component(Component::new(
            "a",
            ComponentKind::Network,
            Arc::new(Scripted::new(Behavior::Succeed, &log)),
        ))
        .unwrap();
    graph
        .add_component(Component::new(
            "b",
            ComponentKind::Database,
            Arc::new(Scripted::new(Behavior::Fail, &log)),
        ))
        .unwrap();
    graph
        .add_component(
            Component::new("c", ComponentKind::AppDeployment, join.clone())
                .depends_on("a")
                .depends_on("b"),
        )
        .unwrap();

    let report = Scheduler::new().run(&graph).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(join.calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.state_of("a"), Some(NodeState::RolledBack));
    assert_eq!(report.state_of("b"), Some(NodeState::Failed));
    assert_eq!(report.state_of("c"), Some(NodeState::NotStarted));

    let failure = report.failure.clone().unwrap();
    assert_eq!(failure.component.as_deref(), Some("b"));
    assert_eq!(failure.error.code, ErrorCode::Provider);
    assert!(failure.error.message.contains("quota exceeded"));

    assert_eq!(report.rollback.len(), 1);
    assert_eq!(report.rollback[0].component, "a");
    assert_eq!(report.rollback[0].outcome, RollbackOutcome::Destroyed);
}

#[tokio::test(start_paused = true)]
async fn transient_provider_errors_are_retried() {
    let log = journal();
    let action = Arc::new(Scripted::new(Behavior::FailTransiently(2), &log));

    let mut graph = DependencyGraph::new();
    graph
        .add_component(
            Component::new("db", ComponentKind::Database, action.clone())
                .with_retry(RetryPolicy::with_max_attempts(3)),
        )
        .unwrap();

    let report = Scheduler::new().run(&graph).await.unwrap();

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(action.calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.component("db").unwrap().attempts, 3);
}

#[tokio::test]
async fn permanent_errors_are_not_retried() {
    let log = journal();
    let action = Arc::new(Scripted::new(Behavior::Fail, &log));

    let mut graph = DependencyGraph::new();
    graph
        .add_component(
            Component::new("db", ComponentKind::Database, action.clone())
                .with_retry(RetryPolicy::with_max_attempts(5)),
        )
        .unwrap();

    let report = Scheduler::new().run(&graph).await.unwrap();

    assert_eq!(report.state_of("db"), Some(NodeState::Failed));
    assert_eq!(action.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn retries_never_outlive_the_phase_deadline() {
    let log = journal();
    let action = Arc::new(Scripted::new(Behavior::FailTransiently(u32::MAX), &log));

    let mut graph = DependencyGraph::new();
    graph
        .add_component(
            Component::new("db", ComponentKind::Database, action.clone())
                .with_retry(RetryPolicy::with_max_attempts(100))
                .with_timeouts(Timeouts::uniform(Duration::from_secs(10))),
        )
        .unwrap();

    let started = tokio::time::Instant::now();
    let report = Scheduler::new().run(&graph).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(11));
    let error = report.component("db").unwrap().error.clone().unwrap();
    assert_eq!(error.code, ErrorCode::Timeout);
    assert!(action.calls.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn delete_before_replace_destroys_old_resource_first() {
    let log = journal();
    let mut graph = DependencyGraph::new();
    graph
        .add_component(
            Component::new(
                "app-cluster",
                ComponentKind::Cluster,
                Arc::new(Scripted::new(Behavior::Succeed, &log)),
            )
            .delete_before_replace(),
        )
        .unwrap();

    let prior = PriorState::new().with_replacement("app-cluster", ResourceHandle::new("gke-old"));
    let report = Scheduler::new()
        .with_change_detector(Arc::new(prior))
        .run(&graph)
        .await
        .unwrap();

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(
        entries(&log),
        vec!["delete:app-cluster:gke-old", "create:app-cluster"]
    );
    assert_eq!(
        report.component("app-cluster").unwrap().change,
        Some(ChangeKind::Replace)
    );
}

#[tokio::test]
async fn replacement_creates_before_destroying_by_default() {
    let log = journal();
    let mut graph = DependencyGraph::new();
    graph
        .add_component(Component::new(
            "app-cluster",
            ComponentKind::Cluster,
            Arc::new(Scripted::new(Behavior::Succeed, &log)),
        ))
        .unwrap();

    let prior = PriorState::new().with_replacement("app-cluster", ResourceHandle::new("gke-old"));
    let report = Scheduler::new()
        .with_change_detector(Arc::new(prior))
        .run(&graph)
        .await
        .unwrap();

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(
        entries(&log),
        vec!["create:app-cluster", "delete:app-cluster:gke-old"]
    );
}

#[tokio::test]
async fn updated_resources_survive_rollback() {
    let log = journal();
    let mut graph = DependencyGraph::new();
    graph
        .add_component(Component::new(
            "main-network",
            ComponentKind::Network,
            Arc::new(Scripted::new(Behavior::Succeed, &log)),
        ))
        .unwrap();
    graph
        .add_component(
            Component::new(
                "app-cluster",
                ComponentKind::Cluster,
                Arc::new(Scripted::new(Behavior::Fail, &log)),
            )
            .depends_on("main-network"),
        )
        .unwrap();

    let prior = PriorState::new().with_update("main-network", ResourceHandle::new("vpc-1"));
    let report = Scheduler::new()
        .with_change_detector(Arc::new(prior))
        .run(&graph)
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.state_of("main-network"), Some(NodeState::Applied));
    assert!(report.rollback.is_empty());
    assert_eq!(
        entries(&log),
        vec!["update:main-network", "create:app-cluster"]
    );
}

#[tokio::test(start_paused = true)]
async fn max_concurrency_bounds_components_in_flight() {
    async fn peak_with(limit: usize) -> usize {
        let log = journal();
        let gauge = Arc::new(Gauge::default());
        let mut graph = DependencyGraph::new();
        for i in 0..6 {
            graph
                .add_component(Component::new(
                    format!("service-{i}"),
                    ComponentKind::AppDeployment,
                    Arc::new(
                        Scripted::new(Behavior::Sleep(Duration::from_secs(1)), &log).gauge(&gauge),
                    ),
                ))
                .unwrap();
        }
        let report = Scheduler::new()
            .with_max_concurrency(limit)
            .run(&graph)
            .await
            .unwrap();
        assert!(report.is_success(), "{}", report.summary());
        gauge.peak.load(Ordering::SeqCst)
    }

    assert_eq!(peak_with(2).await, 2);
    assert_eq!(peak_with(0).await, 6);
}

#[tokio::test]
async fn rollback_continues_past_a_failed_destroy() {
    let log = journal();
    let mut graph = DependencyGraph::new();
    graph
        .add_component(Component::new(
            "a",
            ComponentKind::Network,
            Arc::new(Scripted::new(Behavior::Succeed, &log).failing_destroy()),
        ))
        .unwrap();
    graph
        .add_component(
            Component::new(
                "b",
                ComponentKind::Cluster,
                Arc::new(Scripted::new(Behavior::Succeed, &log).failing_destroy()),
            )
            .depends_on("a"),
        )
        .unwrap();
    graph
        .add_component(
            Component::new(
                "c",
                ComponentKind::AddonSet,
                Arc::new(Scripted::new(Behavior::Succeed, &log)),
            )
            .depends_on("b"),
        )
        .unwrap();
    graph
        .add_component(
            Component::new(
                "d",
                ComponentKind::AppDeployment,
                Arc::new(Scripted::new(Behavior::Fail, &log)),
            )
            .depends_on("c"),
        )
        .unwrap();

    let report = Scheduler::new().run(&graph).await.unwrap();

    let order: Vec<(&str, RollbackOutcome)> = report
        .rollback
        .iter()
        .map(|e| (e.component.as_str(), e.outcome))
        .collect();
    assert_eq!(
        order,
        vec![
            ("c", RollbackOutcome::Destroyed),
            ("b", RollbackOutcome::Failed),
            ("a", RollbackOutcome::Failed),
        ]
    );
    assert_eq!(report.state_of("a"), Some(NodeState::RollbackFailed));
    assert_eq!(report.state_of("b"), Some(NodeState::RollbackFailed));
    assert_eq!(report.state_of("c"), Some(NodeState::RolledBack));
    assert!(report.summary().contains("b: failed"));
}

#[tokio::test]
async fn rolled_back_outputs_are_retracted() {
    let log = journal();
    let mut graph = DependencyGraph::new();
    graph
        .add_component(Component::new(
            "net",
            ComponentKind::Network,
            Arc::new(
                Scripted::new(Behavior::Succeed, &log)
                    .outputs(Outputs::new().with("vpc_id", "vpc-1")),
            ),
        ))
        .unwrap();
    graph
        .add_component(
            Component::new(
                "cluster",
                ComponentKind::Cluster,
                Arc::new(Scripted::new(Behavior::Fail, &log)),
            )
            .depends_on("net"),
        )
        .unwrap();
    let scheduler = Scheduler::new();

    let report = scheduler.run(&graph).await.unwrap();

    assert_eq!(report.state_of("net"), Some(NodeState::RolledBack));
    let outputs = scheduler.outputs();
    assert!(!outputs.contains("net", "vpc_id"));
    assert!(outputs.export_all().is_empty());
}

#[tokio::test]
async fn outputs_survive_a_failed_destroy_during_rollback() {
    let log = journal();
    let mut graph = DependencyGraph::new();
    graph
        .add_component(Component::new(
            "net",
            ComponentKind::Network,
            Arc::new(
                Scripted::new(Behavior::Succeed, &log)
                    .outputs(Outputs::new().with("vpc_id", "vpc-1"))
                    .failing_destroy(),
            ),
        ))
        .unwrap();
    graph
        .add_component(
            Component::new(
                "cluster",
                ComponentKind::Cluster,
                Arc::new(Scripted::new(Behavior::Fail, &log)),
            )
            .depends_on("net"),
        )
        .unwrap();
    let scheduler = Scheduler::new();

    let report = scheduler.run(&graph).await.unwrap();

    assert_eq!(report.state_of("net"), Some(NodeState::RollbackFailed));
    assert_eq!(scheduler.outputs().get("net", "vpc_id").unwrap(), json!("vpc-1"));
}

#[tokio::test]
async fn one_scheduler_runs_graphs_back_to_back() {
    let log = journal();
    let build = || {
        let mut graph = DependencyGraph::new();
        graph
            .add_component(Component::new(
                "net",
                ComponentKind::Network,
                Arc::new(
                    Scripted::new(Behavior::Succeed, &log)
                        .outputs(Outputs::new().with("vpc_id", "vpc-1")),
                ),
            ))
            .unwrap();
        graph
            .export("vpc_id", Deferred::output("net", "vpc_id"))
            .unwrap();
        graph
    };
    let scheduler = Scheduler::new();

    let first = scheduler.run(&build()).await.unwrap();
    let second = scheduler.clone().run(&build()).await.unwrap();

    assert!(first.is_success(), "{}", first.summary());
    assert!(second.is_success(), "{}", second.summary());
    assert!(second.rollback.is_empty());
    assert_eq!(second.exports["vpc_id"], json!("vpc-1"));
    assert_eq!(scheduler.outputs().len(), 1);
}

#[tokio::test]
async fn unpublished_input_fails_the_consumer() {
    let log = journal();
    let mut graph = DependencyGraph::new();
    graph
        .add_component(Component::new(
            "main-network",
            ComponentKind::Network,
            Arc::new(Scripted::new(Behavior::Succeed, &log)),
        ))
        .unwrap();
    graph
        .add_component(
            Component::new(
                "app-cluster",
                ComponentKind::Cluster,
                Arc::new(Scripted::new(Behavior::Succeed, &log)),
            )
            .input("network", Deferred::output("main-network", "vpc_id")),
        )
        .unwrap();

    let report = Scheduler::new().run(&graph).await.unwrap();

    let entry = report.component("app-cluster").unwrap();
    assert_eq!(entry.state, NodeState::Failed);
    assert_eq!(entry.attempts, 0);
    assert_eq!(entry.error.as_ref().unwrap().code, ErrorCode::UnresolvedInput);
    assert_eq!(report.state_of("main-network"), Some(NodeState::RolledBack));
    assert_eq!(
        entries(&log),
        vec!["create:main-network", "delete:main-network:main-network-1"]
    );
}

#[tokio::test]
async fn sensitive_outputs_stay_out_of_exports() {
    let log = journal();
    let mut graph = DependencyGraph::new();
    graph
        .add_component(Component::new(
            "app-db",
            ComponentKind::Database,
            Arc::new(Scripted::new(Behavior::Succeed, &log).outputs(
                Outputs::new()
                    .with("host", "10.1.0.5")
                    .with_sensitive("password", "s3cr3t"),
            )),
        ))
        .unwrap();
    graph
        .export("db_host", Deferred::output("app-db", "host"))
        .unwrap();
    graph
        .export("db_password", Deferred::output("app-db", "password"))
        .unwrap();

    let scheduler = Scheduler::new();
    let report = scheduler.run(&graph).await.unwrap();

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(report.exports.get("db_host"), Some(&json!("10.1.0.5")));
    assert!(!report.exports.contains_key("db_password"));

    let registry = scheduler.outputs();
    assert_eq!(registry.get("app-db", "password").unwrap(), json!("s3cr3t"));
    assert!(registry.is_sensitive("app-db", "password"));
    assert!(!registry.export_all().contains_key("app-db.password"));
    assert!(!serde_json::to_string(&report).unwrap().contains("s3cr3t"));
}

#[tokio::test]
async fn unresolvable_export_fails_the_run() {
    let log = journal();
    let mut graph = DependencyGraph::new();
    graph
        .add_component(Component::new(
            "main-network",
            ComponentKind::Network,
            Arc::new(Scripted::new(Behavior::Succeed, &log)),
        ))
        .unwrap();
    graph
        .export("vpc_id", Deferred::output("main-network", "vpc_id"))
        .unwrap();

    let report = Scheduler::new().run(&graph).await.unwrap();

    assert!(!report.is_success());
    let failure = report.failure.clone().unwrap();
    assert_eq!(failure.component, None);
    assert_eq!(failure.error.code, ErrorCode::UnresolvedInput);
    assert_eq!(report.state_of("main-network"), Some(NodeState::RolledBack));
    assert!(report.exports.is_empty());
}

#[tokio::test]
async fn invalid_graph_is_rejected_before_anything_runs() {
    let log = journal();
    let mut graph = DependencyGraph::new();
    for (name, upstream) in [("a", "c"), ("b", "a"), ("c", "b")] {
        graph
            .add_component(
                Component::new(
                    name,
                    ComponentKind::Custom("test".into()),
                    Arc::new(Scripted::new(Behavior::Succeed, &log)),
                )
                .depends_on(upstream),
            )
            .unwrap();
    }

    let err = Scheduler::new().run(&graph).await.unwrap_err();

    assert!(matches!(err, Error::CycleDetected { .. }));
    assert!(entries(&log).is_empty());
}
