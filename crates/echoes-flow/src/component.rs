//! Deployable components and the action trait they delegate to.
//!
//! A [`Component`] is one deployable unit (a network, a cluster, an add-on
//! set, a workload). It declares what it depends on, which upstream outputs
//! it consumes, how long each lifecycle phase may take, and the
//! [`ComponentAction`] that actually creates and destroys the resource.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deferred::{Deferred, OutputRef};
use crate::error::{Error, Result};
use crate::policy::{DeletionPolicy, Phase, RetryPolicy, Timeouts};

/// The kind of infrastructure a component manages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// VPC, subnets and firewall rules.
    Network,
    /// A Kubernetes cluster and its node pool.
    Cluster,
    /// Helm releases installed into a cluster.
    AddonSet,
    /// A database and its credentials secret.
    Database,
    /// The application workload.
    AppDeployment,
    /// The monitoring workload.
    MonitoringDeployment,
    /// Kubernetes network policies.
    NetworkPolicy,
    /// Anything else.
    Custom(String),
}

impl ComponentKind {
    /// Returns the snake_case label of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Network => "network",
            Self::Cluster => "cluster",
            Self::AddonSet => "addon_set",
            Self::Database => "database",
            Self::AppDeployment => "app_deployment",
            Self::MonitoringDeployment => "monitoring_deployment",
            Self::NetworkPolicy => "network_policy",
            Self::Custom(kind) => kind,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier of a created resource, used to destroy it later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceHandle(String);

impl ResourceHandle {
    /// Wraps a provider-issued identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Concrete input values handed to an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedInputs(BTreeMap<String, Value>);

impl ResolvedInputs {
    /// Wraps resolved values.
    #[must_use]
    pub const fn new(values: BTreeMap<String, Value>) -> Self {
        Self(values)
    }

    /// Returns an input by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns a string input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the input is absent or not a string.
    pub fn get_str(&self, key: &str) -> Result<&str> {
        match self.0.get(key) {
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(other) => Err(Error::InvalidInput(format!(
                "input '{key}' must be a string, got {other}"
            ))),
            None => Err(Error::InvalidInput(format!("input '{key}' is missing"))),
        }
    }

    /// Iterates over inputs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct OutputValue {
    value: Value,
    sensitive: bool,
}

/// Outputs produced by a successful apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outputs {
    values: BTreeMap<String, OutputValue>,
}

impl Outputs {
    /// Creates an empty output set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a regular output.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value, false);
        self
    }

    /// Adds an output that must never appear in exports.
    #[must_use]
    pub fn with_sensitive(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value, true);
        self
    }

    /// Adds or replaces an output.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>, sensitive: bool) {
        self.values.insert(
            key.into(),
            OutputValue {
                value: value.into(),
                sensitive,
            },
        );
    }

    /// Returns an output value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).map(|o| &o.value)
    }

    /// Iterates as `(key, value, sensitive)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value, bool)> {
        self.values
            .iter()
            .map(|(k, o)| (k.as_str(), &o.value, o.sensitive))
    }

    /// Number of outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no outputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// What an action returns after creating or updating a resource.
#[derive(Debug, Clone)]
pub struct AppliedResource {
    /// Handle used to destroy the resource later.
    pub handle: ResourceHandle,
    /// Outputs to publish.
    pub outputs: Outputs,
}

impl AppliedResource {
    /// Creates an applied resource.
    #[must_use]
    pub fn new(handle: ResourceHandle, outputs: Outputs) -> Self {
        Self { handle, outputs }
    }
}

/// Everything an action needs to create or update its resource.
#[derive(Debug, Clone)]
pub struct ApplyContext {
    /// Component name.
    pub component: String,
    /// Component kind.
    pub kind: ComponentKind,
    /// Create or update.
    pub phase: Phase,
    /// Deadline for the whole phase, all retries included.
    pub timeout: Duration,
    /// Resolved deferred inputs.
    pub inputs: ResolvedInputs,
    /// The resource being updated, if any.
    pub existing: Option<ResourceHandle>,
}

/// Everything an action needs to destroy its resource.
#[derive(Debug, Clone)]
pub struct DestroyContext {
    /// Component name.
    pub component: String,
    /// Component kind.
    pub kind: ComponentKind,
    /// Deadline for the destroy.
    pub timeout: Duration,
    /// The resource to destroy.
    pub handle: ResourceHandle,
}

/// Creates and destroys the resource behind a component.
///
/// Implementations are expected to be idempotent: the scheduler may retry
/// `apply` after a transient provider failure.
#[async_trait]
pub trait ComponentAction: Send + Sync {
    /// Creates or updates the resource.
    async fn apply(&self, ctx: &ApplyContext) -> Result<AppliedResource>;

    /// Destroys a resource previously returned by `apply`.
    async fn destroy(&self, ctx: &DestroyContext) -> Result<()>;
}

/// One deployable unit in a [`DependencyGraph`](crate::graph::DependencyGraph).
#[derive(Clone)]
pub struct Component {
    name: String,
    kind: ComponentKind,
    depends_on: Vec<String>,
    inputs: BTreeMap<String, Deferred<Value>>,
    timeouts: Timeouts,
    deletion_policy: DeletionPolicy,
    retry: RetryPolicy,
    action: Arc<dyn ComponentAction>,
}

impl Component {
    /// Creates a component with default policies and no dependencies.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: ComponentKind,
        action: Arc<dyn ComponentAction>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            depends_on: Vec::new(),
            inputs: BTreeMap::new(),
            timeouts: Timeouts::default(),
            deletion_policy: DeletionPolicy::default(),
            retry: RetryPolicy::default(),
            action,
        }
    }

    /// Declares an explicit dependency.
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.depends_on.contains(&name) {
            self.depends_on.push(name);
        }
        self
    }

    /// Wires an input. Output references inside `value` become implicit
    /// dependencies.
    #[must_use]
    pub fn input(mut self, key: impl Into<String>, value: impl Into<Deferred<Value>>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Sets the phase deadlines.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the replacement policy.
    #[must_use]
    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = policy;
        self
    }

    /// Shorthand for `delete_before_replace = true`.
    #[must_use]
    pub fn delete_before_replace(mut self) -> Self {
        self.deletion_policy.delete_before_replace = true;
        self
    }

    /// Sets the retry policy for transient provider failures.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Component name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Component kind.
    #[must_use]
    pub const fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    /// Explicitly declared dependencies, in declaration order.
    #[must_use]
    pub fn declared_dependencies(&self) -> &[String] {
        &self.depends_on
    }

    /// Deferred inputs by name.
    #[must_use]
    pub const fn inputs(&self) -> &BTreeMap<String, Deferred<Value>> {
        &self.inputs
    }

    /// Every output this component's inputs reference.
    pub fn input_references(&self) -> impl Iterator<Item = &OutputRef> {
        self.inputs.values().flat_map(|input| input.references())
    }

    /// Phase deadlines.
    #[must_use]
    pub const fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Replacement policy.
    #[must_use]
    pub const fn deletion_policy(&self) -> DeletionPolicy {
        self.deletion_policy
    }

    /// Retry policy.
    #[must_use]
    pub const fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The action that creates and destroys the resource.
    #[must_use]
    pub fn action(&self) -> &Arc<dyn ComponentAction> {
        &self.action
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("depends_on", &self.depends_on)
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("timeouts", &self.timeouts)
            .field("deletion_policy", &self.deletion_policy)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
