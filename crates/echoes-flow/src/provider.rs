//! The cloud resource provider seam.
//!
//! [`ResourceProvider`] is the boundary to whatever actually creates cloud
//! and Kubernetes resources. [`ProviderAction`] adapts a provider into a
//! [`ComponentAction`]: it gathers required secrets, forwards the resource
//! spec with resolved inputs, and marks sensitive outputs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use echoes_core::Redacted;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::component::{
    AppliedResource, ApplyContext, ComponentAction, ComponentKind, DestroyContext, Outputs,
    ResolvedInputs, ResourceHandle,
};
use crate::error::{Error, Result};
use crate::policy::Phase;
use crate::secrets::{SecretSource, require_secret};

/// A failure reported by a resource provider.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    message: String,
    retryable: bool,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    /// A permanent failure (bad request, permission denied).
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            source: None,
        }
    }

    /// A transient failure worth retrying (quota, rate limit, conflict).
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            source: None,
        }
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The provider's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if the same call may succeed later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Reference to a manifest file or directory, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestRef(String);

impl ManifestRef {
    /// Wraps a manifest path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The manifest path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A Helm release to install, passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRef {
    /// Release name.
    pub release: String,
    /// Chart name.
    pub chart: String,
    /// Pinned chart version, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Chart repository URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Target namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Chart values.
    #[serde(default)]
    pub values: Value,
}

impl ChartRef {
    /// Creates a chart reference with no version, repository or values.
    #[must_use]
    pub fn new(release: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            release: release.into(),
            chart: chart.into(),
            version: None,
            repository: None,
            namespace: None,
            values: Value::Null,
        }
    }

    /// Pins the chart version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Sets the chart repository.
    #[must_use]
    pub fn repository(mut self, url: impl Into<String>) -> Self {
        self.repository = Some(url.into());
        self
    }

    /// Sets the release namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the chart values.
    #[must_use]
    pub fn values(mut self, values: Value) -> Self {
        self.values = values;
        self
    }
}

/// Desired state of one resource, as understood by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Provider resource type, e.g. `gcp:container:Cluster`.
    pub resource_type: String,
    /// Static properties.
    #[serde(default)]
    pub properties: Value,
    /// Manifests to apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<ManifestRef>,
    /// Helm releases to install.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<ChartRef>,
}

impl ResourceSpec {
    /// Creates a spec with no properties.
    #[must_use]
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Value::Null,
            manifests: Vec::new(),
            charts: Vec::new(),
        }
    }

    /// Sets the static properties.
    #[must_use]
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Adds a manifest reference.
    #[must_use]
    pub fn with_manifest(mut self, manifest: ManifestRef) -> Self {
        self.manifests.push(manifest);
        self
    }

    /// Adds a Helm release.
    #[must_use]
    pub fn with_chart(mut self, chart: ChartRef) -> Self {
        self.charts.push(chart);
        self
    }
}

/// A create or update call.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Component name.
    pub component: String,
    /// Component kind.
    pub kind: ComponentKind,
    /// Create or update.
    pub phase: Phase,
    /// Desired state.
    pub spec: ResourceSpec,
    /// Resolved upstream values.
    pub inputs: ResolvedInputs,
    /// Secrets the component declared, by name.
    pub secrets: BTreeMap<String, Redacted<String>>,
    /// The resource being updated, if any.
    pub existing: Option<ResourceHandle>,
    /// Deadline for the call.
    pub timeout: Duration,
}

/// What a provider returns after creating a resource.
#[derive(Debug, Clone)]
pub struct ProviderOutputs {
    /// Handle used to destroy the resource.
    pub handle: ResourceHandle,
    /// Output values by key.
    pub values: BTreeMap<String, Value>,
}

/// Creates and deletes concrete resources.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Creates (or updates, when `request.existing` is set) a resource.
    async fn create(
        &self,
        request: &ProviderRequest,
    ) -> std::result::Result<ProviderOutputs, ProviderError>;

    /// Deletes a resource.
    async fn destroy(
        &self,
        handle: &ResourceHandle,
        timeout: Duration,
    ) -> std::result::Result<(), ProviderError>;
}

/// A [`ComponentAction`] backed by a [`ResourceProvider`].
pub struct ProviderAction {
    spec: ResourceSpec,
    provider: Arc<dyn ResourceProvider>,
    secrets: Arc<dyn SecretSource>,
    required_secrets: Vec<String>,
    sensitive_outputs: BTreeSet<String>,
}

impl ProviderAction {
    /// Creates an action that asks `provider` to realize `spec`.
    #[must_use]
    pub fn new(
        spec: ResourceSpec,
        provider: Arc<dyn ResourceProvider>,
        secrets: Arc<dyn SecretSource>,
    ) -> Self {
        Self {
            spec,
            provider,
            secrets,
            required_secrets: Vec::new(),
            sensitive_outputs: BTreeSet::new(),
        }
    }

    /// Declares a secret that must be present at apply time.
    #[must_use]
    pub fn require_secret(mut self, name: impl Into<String>) -> Self {
        self.required_secrets.push(name.into());
        self
    }

    /// Marks an output key as sensitive.
    #[must_use]
    pub fn sensitive_output(mut self, key: impl Into<String>) -> Self {
        self.sensitive_outputs.insert(key.into());
        self
    }

    /// The desired state this action creates.
    #[must_use]
    pub const fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    /// Secrets this action requires.
    #[must_use]
    pub fn required_secrets(&self) -> &[String] {
        &self.required_secrets
    }
}

impl std::fmt::Debug for ProviderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAction")
            .field("spec", &self.spec)
            .field("required_secrets", &self.required_secrets)
            .field("sensitive_outputs", &self.sensitive_outputs)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ComponentAction for ProviderAction {
    async fn apply(&self, ctx: &ApplyContext) -> Result<AppliedResource> {
        let mut secrets = BTreeMap::new();
        for name in &self.required_secrets {
            let value = require_secret(self.secrets.as_ref(), &ctx.component, name)?;
            secrets.insert(name.clone(), value);
        }

        let request = ProviderRequest {
            component: ctx.component.clone(),
            kind: ctx.kind.clone(),
            phase: ctx.phase,
            spec: self.spec.clone(),
            inputs: ctx.inputs.clone(),
            secrets,
            existing: ctx.existing.clone(),
            timeout: ctx.timeout,
        };

        debug!(
            component = %ctx.component,
            resource_type = %self.spec.resource_type,
            phase = %ctx.phase,
            "calling provider"
        );
        let created = self
            .provider
            .create(&request)
            .await
            .map_err(|e| Error::provider(&ctx.component, e))?;

        let mut outputs = Outputs::new();
        for (key, value) in created.values {
            let sensitive = self.sensitive_outputs.contains(&key);
            outputs.insert(key, value, sensitive);
        }
        Ok(AppliedResource::new(created.handle, outputs))
    }

    async fn destroy(&self, ctx: &DestroyContext) -> Result<()> {
        self.provider
            .destroy(&ctx.handle, ctx.timeout)
            .await
            .map_err(|e| Error::provider(&ctx.component, e))
    }
}
