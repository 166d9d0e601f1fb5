//! Scripted resource provider with call recording.
//!
//! Every component succeeds by default. Individual components can be told to
//! fail, fail transiently, hang or take time, and their destroys can be made
//! to fail, so tests drive the scheduler through every failure path.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use echoes_flow::component::ResourceHandle;
use echoes_flow::policy::Phase;
use echoes_flow::provider::{ProviderError, ProviderOutputs, ProviderRequest, ResourceProvider};
use serde_json::Value;

/// Record of a provider call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOp {
    /// Create or update call.
    Create {
        /// Component that asked.
        component: String,
        /// Requested resource type.
        resource_type: String,
        /// Create or update.
        phase: Phase,
        /// Names of the secrets passed along (never the values).
        secrets: Vec<String>,
    },
    /// Destroy call.
    Destroy {
        /// Component owning the handle, if the provider created it.
        component: Option<String>,
        /// Handle that was destroyed.
        handle: ResourceHandle,
    },
}

impl ProviderOp {
    /// The component this call was made for.
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::Create { component, .. } => Some(component),
            Self::Destroy { component, .. } => component.as_deref(),
        }
    }

    /// True for create and update calls.
    pub fn is_create(&self) -> bool {
        matches!(self, Self::Create { .. })
    }
}

/// How a component's create calls behave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Succeeds immediately.
    Succeed,
    /// Fails with a permanent error.
    Fail(String),
    /// Fails transiently this many times, then succeeds.
    FailTimes(u32),
    /// Never returns.
    Hang,
    /// Succeeds after a delay.
    Delay(Duration),
}

/// In-memory provider that records every call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    operations: Arc<Mutex<Vec<ProviderOp>>>,
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    outputs: Arc<Mutex<HashMap<String, BTreeMap<String, Value>>>>,
    failing_destroys: Arc<Mutex<Vec<String>>>,
    owners: Arc<Mutex<HashMap<ResourceHandle, String>>>,
    calls: Arc<Mutex<HashMap<String, u32>>>,
}

impl ScriptedProvider {
    /// Creates a provider where everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how creates for `component` behave.
    pub fn script(&self, component: impl Into<String>, script: Script) {
        self.scripts.lock().expect("lock").insert(component.into(), script);
    }

    /// Sets the outputs returned for `component`.
    ///
    /// Without this, a component returns a single `id` output.
    pub fn set_outputs(
        &self,
        component: impl Into<String>,
        outputs: impl IntoIterator<Item = (impl Into<String>, Value)>,
    ) {
        let outputs = outputs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.outputs
            .lock()
            .expect("lock")
            .insert(component.into(), outputs);
    }

    /// Makes every destroy of `component`'s resources fail.
    pub fn inject_destroy_failure(&self, component: impl Into<String>) {
        self.failing_destroys
            .lock()
            .expect("lock")
            .push(component.into());
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<ProviderOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Components in the order their create calls were made, retries included.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        self.operations()
            .iter()
            .filter(|op| op.is_create())
            .filter_map(|op| op.component().map(str::to_string))
            .collect()
    }

    /// Components in the order their resources were destroyed.
    #[must_use]
    pub fn destroyed(&self) -> Vec<String> {
        self.operations()
            .iter()
            .filter(|op| !op.is_create())
            .filter_map(|op| op.component().map(str::to_string))
            .collect()
    }

    /// Number of create calls made for `component`.
    #[must_use]
    pub fn calls(&self, component: &str) -> u32 {
        self.calls
            .lock()
            .expect("lock")
            .get(component)
            .copied()
            .unwrap_or_default()
    }

    /// Clears recorded operations and call counts.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
        self.calls.lock().expect("lock").clear();
    }

    fn record(&self, op: ProviderOp) {
        self.operations.lock().expect("lock").push(op);
    }
}

#[async_trait]
impl ResourceProvider for ScriptedProvider {
    async fn create(&self, request: &ProviderRequest) -> Result<ProviderOutputs, ProviderError> {
        let call = {
            let mut calls = self.calls.lock().expect("lock");
            let count = calls.entry(request.component.clone()).or_default();
            *count += 1;
            *count
        };
        self.record(ProviderOp::Create {
            component: request.component.clone(),
            resource_type: request.spec.resource_type.clone(),
            phase: request.phase,
            secrets: request.secrets.keys().cloned().collect(),
        });

        let script = self
            .scripts
            .lock()
            .expect("lock")
            .get(&request.component)
            .cloned()
            .unwrap_or(Script::Succeed);
        match script {
            Script::Succeed => {}
            Script::Fail(message) => return Err(ProviderError::new(message)),
            Script::FailTimes(n) if call <= n => {
                return Err(ProviderError::transient(format!(
                    "transient failure {call} of {n}"
                )));
            }
            Script::FailTimes(_) => {}
            Script::Hang => std::future::pending::<()>().await,
            Script::Delay(delay) => tokio::time::sleep(delay).await,
        }

        let handle = request.existing.clone().unwrap_or_else(|| {
            ResourceHandle::new(format!(
                "{}/{}",
                request.spec.resource_type, request.component
            ))
        });
        self.owners
            .lock()
            .expect("lock")
            .insert(handle.clone(), request.component.clone());

        let values = self
            .outputs
            .lock()
            .expect("lock")
            .get(&request.component)
            .cloned()
            .unwrap_or_else(|| {
                BTreeMap::from([("id".to_string(), Value::String(handle.to_string()))])
            });
        Ok(ProviderOutputs { handle, values })
    }

    async fn destroy(
        &self,
        handle: &ResourceHandle,
        _timeout: Duration,
    ) -> Result<(), ProviderError> {
        let component = self.owners.lock().expect("lock").get(handle).cloned();
        self.record(ProviderOp::Destroy {
            component: component.clone(),
            handle: handle.clone(),
        });

        let fails = component.as_ref().is_some_and(|c| {
            self.failing_destroys
                .lock()
                .expect("lock")
                .iter()
                .any(|f| f == c)
        });
        if fails {
            return Err(ProviderError::new(format!(
                "injected destroy failure for {handle}"
            )));
        }
        Ok(())
    }
}
