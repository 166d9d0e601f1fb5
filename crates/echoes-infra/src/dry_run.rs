//! A provider that creates nothing.
//!
//! [`DryRunProvider`] answers every create with deterministic outputs shaped
//! like the real ones, so a whole stack can be scheduled, wired and reported
//! without touching a cloud API. Helm charts and manifests are only logged.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use echoes_flow::component::ResourceHandle;
use echoes_flow::provider::{ProviderError, ProviderOutputs, ProviderRequest, ResourceProvider};
use serde_json::Value;
use tracing::info;

use crate::stack::resource_types;

/// Base64 of `DRY-RUN`, standing in for a cluster CA.
const DRY_RUN_CA: &str = "RFJZLVJVTg==";

/// Synthesizes outputs instead of creating resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunProvider;

impl DryRunProvider {
    fn outputs(request: &ProviderRequest, handle: &ResourceHandle) -> BTreeMap<String, Value> {
        let props = &request.spec.properties;
        let prop = |key: &str| props.get(key).and_then(Value::as_str).unwrap_or_default();

        let mut values = BTreeMap::new();
        values.insert("id".to_string(), Value::String(handle.to_string()));

        match request.spec.resource_type.as_str() {
            resource_types::NETWORK => {
                let project = prop("project");
                let name = prop("name");
                values.insert(
                    "vpc_id".into(),
                    format!("projects/{project}/global/networks/{name}").into(),
                );
                values.insert("vpc_name".into(), name.into());
                for (key, subnet) in [
                    ("app_subnet_id", "app_subnet"),
                    ("monitoring_subnet_id", "monitoring_subnet"),
                ] {
                    let subnet = props.get(subnet);
                    let field = |k: &str| {
                        subnet
                            .and_then(|s| s.get(k))
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                    };
                    values.insert(
                        key.into(),
                        format!(
                            "projects/{project}/regions/{}/subnetworks/{}",
                            field("region"),
                            field("name")
                        )
                        .into(),
                    );
                }
            }
            resource_types::CLUSTER => {
                let name = prop("name");
                values.insert("cluster_name".into(), name.into());
                values.insert("endpoint".into(), fake_endpoint(name).into());
                values.insert("cluster_ca_certificate".into(), DRY_RUN_CA.into());
                values.insert("location".into(), prop("zone").into());
            }
            resource_types::DATABASE => {
                values.insert("secret_name".into(), prop("secret_name").into());
                if let Some(password) = request.secrets.get(prop("password_secret")) {
                    values.insert("password".into(), password.expose().clone().into());
                }
            }
            _ => {}
        }
        values
    }
}

/// A stable address in the documentation range `203.0.113.0/24`.
fn fake_endpoint(name: &str) -> String {
    let octet = name.bytes().fold(0u32, |acc, b| (acc * 31 + u32::from(b)) % 254) + 1;
    format!("203.0.113.{octet}")
}

#[async_trait]
impl ResourceProvider for DryRunProvider {
    async fn create(&self, request: &ProviderRequest) -> Result<ProviderOutputs, ProviderError> {
        let handle = request.existing.clone().unwrap_or_else(|| {
            ResourceHandle::new(format!(
                "dry-run:{}/{}",
                request.spec.resource_type, request.component
            ))
        });
        for chart in &request.spec.charts {
            info!(
                component = %request.component,
                release = %chart.release,
                chart = %chart.chart,
                "dry run: skipping helm release"
            );
        }
        for manifest in &request.spec.manifests {
            info!(
                component = %request.component,
                manifest = %manifest.as_str(),
                "dry run: skipping manifest"
            );
        }
        info!(
            component = %request.component,
            resource_type = %request.spec.resource_type,
            phase = %request.phase,
            handle = %handle,
            "dry run: resource planned"
        );

        let values = Self::outputs(request, &handle);
        Ok(ProviderOutputs { handle, values })
    }

    async fn destroy(
        &self,
        handle: &ResourceHandle,
        _timeout: Duration,
    ) -> Result<(), ProviderError> {
        info!(handle = %handle, "dry run: resource destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echoes_core::Redacted;
    use echoes_flow::component::{ComponentKind, ResolvedInputs};
    use echoes_flow::policy::Phase;
    use echoes_flow::provider::ResourceSpec;
    use serde_json::json;

    fn request(resource_type: &str, properties: Value) -> ProviderRequest {
        ProviderRequest {
            component: "c".into(),
            kind: ComponentKind::Custom("test".into()),
            phase: Phase::Create,
            spec: ResourceSpec::new(resource_type).with_properties(properties),
            inputs: ResolvedInputs::default(),
            secrets: BTreeMap::new(),
            existing: None,
            timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn cluster_outputs_are_deterministic() {
        let req = request(
            resource_types::CLUSTER,
            json!({"name": "app-cluster", "zone": "us-west3-a"}),
        );
        let first = DryRunProvider.create(&req).await.unwrap();
        let second = DryRunProvider.create(&req).await.unwrap();

        assert_eq!(first.values, second.values);
        assert_eq!(first.values["cluster_name"], json!("app-cluster"));
        assert_eq!(first.values["location"], json!("us-west3-a"));
        assert!(
            first.values["endpoint"]
                .as_str()
                .unwrap()
                .starts_with("203.0.113.")
        );
        assert_eq!(first.handle.as_str(), "dry-run:gcp:container:Cluster/c");
    }

    #[tokio::test]
    async fn network_outputs_name_subnets() {
        let req = request(
            resource_types::NETWORK,
            json!({
                "project": "p",
                "name": "vpc",
                "app_subnet": {"name": "app-subnet", "region": "us-west3"},
                "monitoring_subnet": {"name": "monitoring-subnet", "region": "us-west4"},
            }),
        );
        let out = DryRunProvider.create(&req).await.unwrap();
        assert_eq!(out.values["vpc_id"], json!("projects/p/global/networks/vpc"));
        assert_eq!(
            out.values["monitoring_subnet_id"],
            json!("projects/p/regions/us-west4/subnetworks/monitoring-subnet")
        );
    }

    #[tokio::test]
    async fn database_echoes_its_password_secret() {
        let mut req = request(
            resource_types::DATABASE,
            json!({"secret_name": "postgres-secret", "password_secret": "POSTGRES_PASSWORD"}),
        );
        req.secrets
            .insert("POSTGRES_PASSWORD".into(), Redacted::new("pw".to_string()));
        let out = DryRunProvider.create(&req).await.unwrap();
        assert_eq!(out.values["secret_name"], json!("postgres-secret"));
        assert_eq!(out.values["password"], json!("pw"));
    }

    #[tokio::test]
    async fn updates_keep_the_existing_handle() {
        let mut req = request("k8s:Deployment", json!({}));
        req.existing = Some(ResourceHandle::new("live-1"));
        let out = DryRunProvider.create(&req).await.unwrap();
        assert_eq!(out.handle.as_str(), "live-1");
    }
}
