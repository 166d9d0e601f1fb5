//! Dependency-ordered execution with deadlines and rollback.
//!
//! The scheduler executes a [`DependencyGraph`] with:
//!
//! - **Dependency ordering**: a component starts only once every dependency
//!   is `APPLIED`, and its deferred inputs are resolved right before it runs
//! - **Parallelism**: independent branches are in flight together, polled
//!   from a single coordinating task
//! - **Deadlines**: every lifecycle phase is bounded by the component's
//!   timeout, retries included
//! - **Rollback**: on the first failure no new component starts; once
//!   in-flight work settles, resources created by the run are destroyed in
//!   reverse topological order
//!
//! ## Example
//!
//! ```rust,no_run
//! use echoes_flow::graph::DependencyGraph;
//! use echoes_flow::scheduler::Scheduler;
//!
//! # async fn deploy(graph: DependencyGraph) -> echoes_flow::error::Result<()> {
//! let report = Scheduler::new().with_max_concurrency(4).run(&graph).await?;
//! if !report.is_success() {
//!     eprintln!("{}", report.summary());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::Utc;
use echoes_core::RunId;
use echoes_core::observability::{component_span, run_span};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::{Instrument, debug, error, info, warn};

use crate::change::{ChangeDetector, FreshDeployment, PlannedChange};
use crate::component::{
    AppliedResource, ApplyContext, Component, DestroyContext, Outputs, ResolvedInputs,
    ResourceHandle,
};
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::metrics::{DeployMetrics, TimingGuard};
use crate::outputs::OutputRegistry;
use crate::policy::Phase;
use crate::report::{
    ComponentReport, ExecutionReport, FailureSummary, NodeError, RollbackEntry, RollbackOutcome,
    RunOutcome,
};
use crate::retry::retry_with_backoff;
use crate::state::NodeState;

/// Result of driving one component through its phases.
struct NodeOutcome {
    index: usize,
    phase: Phase,
    attempts: u32,
    /// A resource this run created, live even if a later phase failed.
    created: Option<ResourceHandle>,
    result: Result<AppliedResource>,
}

/// Executes dependency graphs.
///
/// Every [`Scheduler::run`] publishes into a registry of its own, so one
/// scheduler can run any number of graphs in sequence.
#[derive(Clone)]
pub struct Scheduler {
    last_outputs: Arc<RwLock<Arc<OutputRegistry>>>,
    change_detector: Arc<dyn ChangeDetector>,
    metrics: DeployMetrics,
    max_concurrency: Option<usize>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("outputs", &self.outputs().len())
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler for a fresh deployment with unbounded concurrency.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_outputs: Arc::new(RwLock::new(Arc::new(OutputRegistry::new()))),
            change_detector: Arc::new(FreshDeployment),
            metrics: DeployMetrics::new(),
            max_concurrency: None,
        }
    }

    /// Uses `detector` to decide between create, update and replace.
    #[must_use]
    pub fn with_change_detector(mut self, detector: Arc<dyn ChangeDetector>) -> Self {
        self.change_detector = detector;
        self
    }

    /// Bounds the number of components in flight; `0` means unbounded.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = (limit > 0).then_some(limit);
        self
    }

    /// Outputs published by the most recent run.
    ///
    /// Components destroyed by rollback no longer appear here.
    #[must_use]
    pub fn outputs(&self) -> Arc<OutputRegistry> {
        self.last_outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies every component of `graph` in dependency order.
    ///
    /// Runtime failures (timeouts, provider errors, missing secrets,
    /// unresolved inputs) do not produce `Err`: they roll back and are
    /// reported through a `FAILED` [`ExecutionReport`].
    ///
    /// # Errors
    ///
    /// Returns an error, before anything is applied, if the graph is invalid
    /// ([`Error::UnknownComponent`], [`Error::CycleDetected`]).
    pub async fn run(&self, graph: &DependencyGraph) -> Result<ExecutionReport> {
        let run_id = RunId::generate();
        let span = run_span("deploy", &run_id.to_string());
        self.run_inner(run_id, graph).instrument(span).await
    }

    #[allow(clippy::too_many_lines)]
    async fn run_inner(&self, run_id: RunId, graph: &DependencyGraph) -> Result<ExecutionReport> {
        let resolved = graph.resolve()?;
        let started_at = Utc::now();
        let registry = Arc::new(OutputRegistry::new());
        *self
            .last_outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&registry);

        let nodes: Vec<&Component> = resolved
            .order
            .iter()
            .map(|name| {
                graph.component(name).ok_or_else(|| Error::UnknownComponent {
                    name: name.clone(),
                })
            })
            .collect::<Result<_>>()?;
        let position: BTreeMap<&str, usize> = resolved
            .order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut waiting: Vec<usize> = Vec::with_capacity(nodes.len());
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (index, name) in resolved.order.iter().enumerate() {
            let deps = resolved.dependencies.get(name).map_or(&[][..], Vec::as_slice);
            waiting.push(deps.len());
            for dep in deps {
                if let Some(&dep_index) = position.get(dep.as_str()) {
                    dependents[dep_index].push(index);
                }
            }
        }

        let mut entries: Vec<ComponentReport> = nodes
            .iter()
            .map(|c| ComponentReport::pending(c.name(), c.kind().clone()))
            .collect();
        let mut created: Vec<Option<ResourceHandle>> = vec![None; nodes.len()];
        let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| waiting[i] == 0).collect();
        let mut in_flight: FuturesUnordered<BoxFuture<'_, NodeOutcome>> = FuturesUnordered::new();
        let mut failure: Option<FailureSummary> = None;
        let limit = self.max_concurrency.unwrap_or(usize::MAX);

        info!(components = nodes.len(), "starting deployment");

        loop {
            while failure.is_none() && in_flight.len() < limit {
                let Some(index) = ready.pop_first() else {
                    break;
                };
                let component = nodes[index];
                let entry = &mut entries[index];

                self.transition(entry, NodeState::Resolving)?;
                entry.started_at = Some(Utc::now());

                match resolve_inputs(component, &registry) {
                    Ok(inputs) => {
                        let change = self.change_detector.detect(component);
                        entry.change = Some(change.kind());
                        self.transition(entry, NodeState::Applying)?;
                        info!(
                            component = %component.name(),
                            change = %change.kind(),
                            "applying component"
                        );
                        in_flight.push(self.execute(index, component, change, inputs).boxed());
                    }
                    Err(err) => {
                        error!(
                            component = %component.name(),
                            error = %err,
                            "input resolution failed"
                        );
                        entry.finished_at = Some(Utc::now());
                        let recorded = NodeError::from_error(&err, None);
                        entry.error = Some(recorded.clone());
                        self.transition(entry, NodeState::Failed)?;
                        failure = Some(FailureSummary {
                            component: Some(component.name().to_string()),
                            error: recorded,
                        });
                    }
                }
            }

            let Some(outcome) = in_flight.next().await else {
                break;
            };

            let index = outcome.index;
            let component = nodes[index];
            let entry = &mut entries[index];
            entry.attempts = outcome.attempts;
            entry.phase = Some(outcome.phase);
            entry.finished_at = Some(Utc::now());
            if let Some(handle) = &outcome.created {
                entry.handle = Some(handle.clone());
            }
            created[index] = outcome.created;

            let applied = outcome.result.and_then(|applied| {
                entry.handle = Some(applied.handle.clone());
                publish(&registry, component.name(), &applied.outputs)
            });

            match applied {
                Ok(()) => {
                    self.transition(entry, NodeState::Applied)?;
                    info!(
                        component = %component.name(),
                        attempts = outcome.attempts,
                        "component applied"
                    );
                    for &dependent in &dependents[index] {
                        waiting[dependent] = waiting[dependent].saturating_sub(1);
                        if waiting[dependent] == 0 {
                            ready.insert(dependent);
                        }
                    }
                }
                Err(err) => {
                    error!(
                        component = %component.name(),
                        phase = %outcome.phase,
                        error = %err,
                        "component failed"
                    );
                    let recorded = NodeError::from_error(&err, Some(outcome.phase));
                    entry.error = Some(recorded.clone());
                    self.transition(entry, NodeState::Failed)?;
                    failure.get_or_insert(FailureSummary {
                        component: Some(component.name().to_string()),
                        error: recorded,
                    });
                }
            }
        }

        let mut exports = BTreeMap::new();
        if failure.is_none() {
            match resolve_exports(graph, &registry) {
                Ok(resolved_exports) => exports = resolved_exports,
                Err(err) => {
                    error!(error = %err, "stack export failed");
                    failure = Some(FailureSummary {
                        component: None,
                        error: NodeError::from_error(&err, None),
                    });
                }
            }
        }

        let mut rollback = Vec::new();
        if failure.is_some() {
            rollback = self
                .rollback(&nodes, &created, &mut entries, &registry)
                .await?;
        }

        for entry in &mut entries {
            if entry.state == NodeState::Pending {
                self.transition(entry, NodeState::NotStarted)?;
            }
        }

        let outcome = if failure.is_none() {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        };
        self.metrics.record_run(outcome == RunOutcome::Succeeded);

        let report = ExecutionReport {
            run_id,
            started_at,
            completed_at: Utc::now(),
            outcome,
            components: entries,
            rollback,
            failure,
            exports,
        };
        match report.outcome {
            RunOutcome::Succeeded => info!(summary = %report.summary(), "deployment finished"),
            RunOutcome::Failed => error!(summary = %report.summary(), "deployment failed"),
        }
        Ok(report)
    }

    /// Drives one component through the phases its planned change needs.
    async fn execute(
        &self,
        index: usize,
        component: &Component,
        change: PlannedChange,
        inputs: ResolvedInputs,
    ) -> NodeOutcome {
        let attempts = AtomicU32::new(0);

        let (phase, created, result) = match change {
            PlannedChange::Create => {
                let result = self
                    .apply_phase(component, Phase::Create, None, &inputs, &attempts)
                    .await;
                let created = result.as_ref().ok().map(|a| a.handle.clone());
                (Phase::Create, created, result)
            }
            PlannedChange::Update { existing } => {
                let result = self
                    .apply_phase(component, Phase::Update, Some(existing), &inputs, &attempts)
                    .await;
                (Phase::Update, None, result)
            }
            PlannedChange::Replace { existing }
                if component.deletion_policy().delete_before_replace =>
            {
                match self.destroy_phase(component, &existing, &attempts).await {
                    Err(err) => (Phase::Delete, None, Err(err)),
                    Ok(()) => {
                        let result = self
                            .apply_phase(component, Phase::Create, None, &inputs, &attempts)
                            .await;
                        let created = result.as_ref().ok().map(|a| a.handle.clone());
                        (Phase::Create, created, result)
                    }
                }
            }
            PlannedChange::Replace { existing } => {
                match self
                    .apply_phase(component, Phase::Create, None, &inputs, &attempts)
                    .await
                {
                    Err(err) => (Phase::Create, None, Err(err)),
                    Ok(applied) => {
                        let created = Some(applied.handle.clone());
                        match self.destroy_phase(component, &existing, &attempts).await {
                            Ok(()) => (Phase::Create, created, Ok(applied)),
                            Err(err) => (Phase::Delete, created, Err(err)),
                        }
                    }
                }
            }
        };

        NodeOutcome {
            index,
            phase,
            attempts: attempts.into_inner(),
            created,
            result,
        }
    }

    async fn apply_phase(
        &self,
        component: &Component,
        phase: Phase,
        existing: Option<ResourceHandle>,
        inputs: &ResolvedInputs,
        attempts: &AtomicU32,
    ) -> Result<AppliedResource> {
        let ctx = ApplyContext {
            component: component.name().to_string(),
            kind: component.kind().clone(),
            phase,
            timeout: component.timeouts().for_phase(phase),
            inputs: inputs.clone(),
            existing,
        };
        let action = component.action();
        self.bounded(component, phase, attempts, || action.apply(&ctx))
            .instrument(component_span(
                component.name(),
                component.kind().as_str(),
                &phase.to_string(),
            ))
            .await
    }

    async fn destroy_phase(
        &self,
        component: &Component,
        handle: &ResourceHandle,
        attempts: &AtomicU32,
    ) -> Result<()> {
        let ctx = DestroyContext {
            component: component.name().to_string(),
            kind: component.kind().clone(),
            timeout: component.timeouts().delete,
            handle: handle.clone(),
        };
        let action = component.action();
        self.bounded(component, Phase::Delete, attempts, || action.destroy(&ctx))
            .instrument(component_span(
                component.name(),
                component.kind().as_str(),
                "delete",
            ))
            .await
    }

    /// Runs `operation` with retries, bounded by the phase deadline.
    async fn bounded<T, F, Fut>(
        &self,
        component: &Component,
        phase: Phase,
        attempts: &AtomicU32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let limit = component.timeouts().for_phase(phase);
        let kind = component.kind().as_str();
        let phase_label = phase.to_string();
        let operation_name = format!("{}/{phase}", component.name());
        let before = attempts.load(Ordering::SeqCst);

        let succeeded = AtomicBool::new(false);
        let _timer = TimingGuard::new(|elapsed| {
            self.metrics.observe_phase_duration(
                kind,
                &phase_label,
                succeeded.load(Ordering::SeqCst),
                elapsed,
            );
        });
        let attempt = || {
            attempts.fetch_add(1, Ordering::SeqCst);
            operation()
        };
        let result = tokio::time::timeout(
            limit,
            retry_with_backoff(component.retry(), &operation_name, Error::is_retryable, attempt),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::Timeout {
                component: component.name().to_string(),
                phase,
                limit,
            })
        });

        let calls = attempts.load(Ordering::SeqCst).saturating_sub(before);
        self.metrics
            .record_retries(kind, &phase_label, calls.saturating_sub(1));
        succeeded.store(result.is_ok(), Ordering::SeqCst);
        result
    }

    /// Destroys every resource created by this run, newest first, and
    /// retracts the outputs of each one destroyed.
    ///
    /// Only resources this run created are touched. A component that was
    /// updated in place keeps its pre-existing resource and stays `APPLIED`.
    async fn rollback(
        &self,
        nodes: &[&Component],
        created: &[Option<ResourceHandle>],
        entries: &mut [ComponentReport],
        registry: &OutputRegistry,
    ) -> Result<Vec<RollbackEntry>> {
        let mut rolled_back = Vec::new();

        for index in (0..nodes.len()).rev() {
            let Some(handle) = created[index].as_ref() else {
                continue;
            };
            let component = nodes[index];
            info!(component = %component.name(), handle = %handle, "rolling back");

            let started_at = Utc::now();
            let attempts = AtomicU32::new(0);
            let result = self.destroy_phase(component, handle, &attempts).await;
            let finished_at = Utc::now();
            self.metrics.record_rollback(result.is_ok());

            let entry = &mut entries[index];
            let (outcome, error) = match result {
                Ok(()) => {
                    let retracted = registry.retract(component.name());
                    debug!(component = %component.name(), retracted, "outputs retracted");
                    if entry.state == NodeState::Applied {
                        self.transition(entry, NodeState::RolledBack)?;
                    }
                    (RollbackOutcome::Destroyed, None)
                }
                Err(err) => {
                    warn!(
                        component = %component.name(),
                        handle = %handle,
                        error = %err,
                        "rollback destroy failed, continuing"
                    );
                    if entry.state == NodeState::Applied {
                        self.transition(entry, NodeState::RollbackFailed)?;
                    }
                    (
                        RollbackOutcome::Failed,
                        Some(NodeError::from_error(&err, Some(Phase::Delete))),
                    )
                }
            };

            rolled_back.push(RollbackEntry {
                component: component.name().to_string(),
                handle: handle.clone(),
                outcome,
                error,
                started_at,
                finished_at,
            });
        }

        Ok(rolled_back)
    }

    fn transition(&self, entry: &mut ComponentReport, to: NodeState) -> Result<()> {
        let from = entry.transition(to)?;
        self.metrics.record_transition(entry.kind.as_str(), from, to);
        debug!(component = %entry.component, %from, %to, "state transition");
        Ok(())
    }
}

fn resolve_inputs(component: &Component, registry: &OutputRegistry) -> Result<ResolvedInputs> {
    component
        .inputs()
        .iter()
        .map(|(key, value)| Ok((key.clone(), value.resolve(registry)?)))
        .collect::<Result<BTreeMap<_, _>>>()
        .map(ResolvedInputs::new)
}

fn publish(registry: &OutputRegistry, component: &str, outputs: &Outputs) -> Result<()> {
    for (key, value, sensitive) in outputs.iter() {
        registry.publish(component, key, value.clone(), sensitive)?;
    }
    Ok(())
}

/// Resolves stack exports, skipping any that read a sensitive output.
fn resolve_exports(
    graph: &DependencyGraph,
    registry: &OutputRegistry,
) -> Result<BTreeMap<String, serde_json::Value>> {
    let mut exports = BTreeMap::new();
    for (name, value) in graph.exports() {
        let sensitive = value
            .references()
            .iter()
            .any(|r| registry.is_sensitive(&r.component, &r.key));
        if sensitive {
            debug!(export = %name, "omitting export derived from a sensitive output");
            continue;
        }
        exports.insert(name.clone(), value.resolve(registry)?);
    }
    Ok(exports)
}
