//! The echoes infrastructure and workload stacks.
//!
//! Both builders are pure: they read [`Settings`] and return a validated
//! [`DependencyGraph`] whose components are [`ProviderAction`]s. Nothing is
//! created until the graph is handed to a scheduler.

use std::sync::Arc;

use echoes_flow::component::{Component, ComponentKind};
use echoes_flow::deferred::Deferred;
use echoes_flow::graph::DependencyGraph;
use echoes_flow::policy::Timeouts;
use echoes_flow::provider::{ChartRef, ManifestRef, ProviderAction, ResourceProvider, ResourceSpec};
use echoes_flow::secrets::SecretSource;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::Result;
use crate::kubeconfig::create_kubeconfig;
use crate::settings::{ClusterSettings, MachineSettings, Settings, SubnetSettings};

/// Resource type identifiers understood by providers.
pub mod resource_types {
    /// VPC with subnets and firewall rules.
    pub const NETWORK: &str = "gcp:compute:Network";
    /// GKE cluster with its node pool.
    pub const CLUSTER: &str = "gcp:container:Cluster";
    /// Namespaces and Helm releases installed into a cluster.
    pub const ADDONS: &str = "k8s:helm:AddonSet";
    /// Baseline network policies.
    pub const NETWORK_POLICY: &str = "k8s:NetworkPolicySet";
    /// Postgres statefulset with its credentials secret.
    pub const DATABASE: &str = "k8s:Postgres";
    /// Application deployment, service and ingresses.
    pub const APP: &str = "k8s:AppDeployment";
    /// Monitoring configuration.
    pub const MONITORING: &str = "k8s:MonitoringDeployment";
}

/// Component names used by the stacks.
pub mod names {
    /// Shared VPC.
    pub const NETWORK: &str = "main-network";
    /// Application cluster.
    pub const APP_CLUSTER: &str = "app-cluster";
    /// Application cluster add-ons.
    pub const APP_ADDONS: &str = "app-addons";
    /// Monitoring cluster.
    pub const MONITORING_CLUSTER: &str = "monitoring-cluster";
    /// Monitoring cluster add-ons.
    pub const MONITORING_ADDONS: &str = "monitoring-addons";
    /// Workload network policies.
    pub const POLICIES: &str = "network";
    /// Workload database.
    pub const POSTGRES: &str = "postgres";
    /// Workload application.
    pub const APP: &str = "app";
    /// Workload monitoring.
    pub const MONITORING: &str = "monitoring";
}

const TAILSCALE_REPO: &str = "https://pkgs.tailscale.com/helmcharts/";
const INGRESS_NGINX_REPO: &str = "https://kubernetes.github.io/ingress-nginx";
const INGRESS_NGINX_VERSION: &str = "4.11.3";
const POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";
const POSTGRES_SECRET_NAME: &str = "postgres-secret";

/// Collaborators every stack component talks to.
#[derive(Clone)]
pub struct StackDeps {
    /// Realizes resource specs.
    pub provider: Arc<dyn ResourceProvider>,
    /// Supplies secrets at apply time.
    pub secrets: Arc<dyn SecretSource>,
}

impl StackDeps {
    /// Bundles a provider and a secret source.
    #[must_use]
    pub fn new(provider: Arc<dyn ResourceProvider>, secrets: Arc<dyn SecretSource>) -> Self {
        Self { provider, secrets }
    }

    fn action(&self, spec: ResourceSpec) -> ProviderAction {
        ProviderAction::new(spec, Arc::clone(&self.provider), Arc::clone(&self.secrets))
    }
}

impl std::fmt::Debug for StackDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackDeps").finish_non_exhaustive()
    }
}

/// Connection details of an existing cluster, for the workload stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAccess {
    /// GKE cluster name.
    pub cluster_name: String,
    /// API server address, without scheme.
    pub endpoint: String,
    /// Base64 cluster CA.
    pub cluster_ca: String,
}

fn component(
    name: &str,
    kind: ComponentKind,
    action: ProviderAction,
    timeout: std::time::Duration,
) -> Component {
    Component::new(name, kind, Arc::new(action))
        .with_timeouts(Timeouts::uniform(timeout))
        .delete_before_replace()
}

fn subnet(prefix: &str, settings: &SubnetSettings) -> Value {
    json!({
        "name": format!("{prefix}-subnet"),
        "region": settings.region,
        "ip_cidr_range": settings.subnet_cidr,
        "secondary_ip_ranges": [
            {"range_name": format!("{prefix}-pods"), "ip_cidr_range": settings.pods_cidr},
            {"range_name": format!("{prefix}-services"), "ip_cidr_range": settings.services_cidr},
        ],
        "log_config": {
            "aggregation_interval": "INTERVAL_5_SEC",
            "flow_sampling": 0.5,
            "metadata": "INCLUDE_ALL_METADATA",
        },
    })
}

fn network_spec(settings: &Settings) -> ResourceSpec {
    let net = &settings.network;
    let (app, mon) = (&net.app_cluster, &net.monitoring_cluster);
    let internal = [
        &app.subnet_cidr,
        &app.pods_cidr,
        &app.services_cidr,
        &mon.subnet_cidr,
        &mon.pods_cidr,
        &mon.services_cidr,
    ];
    let metrics_sources = [
        &app.subnet_cidr,
        &app.pods_cidr,
        &mon.subnet_cidr,
        &mon.pods_cidr,
    ];

    ResourceSpec::new(resource_types::NETWORK).with_properties(json!({
        "project": settings.project.id,
        "name": net.name,
        "auto_create_subnetworks": false,
        "app_subnet": subnet("app", app),
        "monitoring_subnet": subnet("monitoring", mon),
        "firewalls": [
            {
                "name": "allow-internal",
                "allow": [
                    {"protocol": "icmp"},
                    {"protocol": "tcp", "ports": ["0-65535"]},
                    {"protocol": "udp", "ports": ["0-65535"]},
                ],
                "source_ranges": internal,
            },
            {
                "name": "allow-health-checks",
                "allow": [{"protocol": "tcp", "ports": ["80", "443", "8081"]}],
                "source_ranges": net.health_check_ranges,
            },
            {
                "name": "allow-metrics",
                "allow": [{"protocol": "tcp", "ports": ["8081"]}],
                "source_ranges": metrics_sources,
            },
        ],
    }))
}

fn cluster_spec(
    settings: &Settings,
    cluster: &ClusterSettings,
    machine: &MachineSettings,
    range_prefix: &str,
) -> ResourceSpec {
    let pool = &settings.node_pool;
    ResourceSpec::new(resource_types::CLUSTER).with_properties(json!({
        "project": settings.project.id,
        "name": cluster.name,
        "zone": cluster.zone,
        "remove_default_node_pool": true,
        "release_channel": "STABLE",
        "maintenance_window_start": "10:00",
        "ip_allocation_policy": {
            "cluster_secondary_range_name": format!("{range_prefix}-pods"),
            "services_secondary_range_name": format!("{range_prefix}-services"),
        },
        "workload_pool": format!("{}.svc.id.goog", settings.project.id),
        "deletion_protection": false,
        "required_services": [
            "container.googleapis.com",
            "compute.googleapis.com",
            "monitoring.googleapis.com",
            "logging.googleapis.com",
        ],
        "node_pool": {
            "name": format!("{}-node-pool", cluster.name),
            "node_count": pool.node_count,
            "version": pool.node_version,
            "machine_type": machine.machine_type,
            "disk_size_gb": pool.disk_size_gb,
            "disk_type": pool.disk_type,
            "image_type": pool.image_type,
            "oauth_scopes": [
                "https://www.googleapis.com/auth/logging.write",
                "https://www.googleapis.com/auth/monitoring",
                "https://www.googleapis.com/auth/devstorage.read_only",
            ],
            "workload_metadata_mode": "GKE_METADATA",
        },
    }))
}

fn tailscale_chart(hostname: &str) -> ChartRef {
    ChartRef::new("tailscale", "tailscale-operator")
        .repository(TAILSCALE_REPO)
        .namespace("tailscale")
        .values(json!({"operator": {"hostname": hostname}}))
}

/// OAuth credentials are injected by the provider from the named secrets;
/// chart values never carry them.
fn tailscale_oauth(client_id: &str, client_secret: &str) -> Value {
    json!({"release": "tailscale", "client_id": client_id, "client_secret": client_secret})
}

const KUBECONFIG_FIELDS: [&str; 3] = ["cluster_name", "endpoint", "cluster_ca_certificate"];

fn kubeconfig_input(cluster: &str, project_id: &str, zone: &str) -> Deferred<Value> {
    let (project_id, zone) = (project_id.to_string(), zone.to_string());
    let cluster = cluster.to_string();
    Deferred::all(KUBECONFIG_FIELDS.map(|key| Deferred::output(cluster.as_str(), key)))
    .try_map(move |values| {
        let field = |i: usize| {
            values.get(i).and_then(Value::as_str).ok_or_else(|| {
                echoes_flow::error::Error::InvalidInput(format!(
                    "output '{cluster}.{}' must be a string",
                    KUBECONFIG_FIELDS[i]
                ))
            })
        };
        create_kubeconfig(field(0)?, field(1)?, field(2)?, &project_id, &zone)
            .map(Value::String)
            .map_err(|e| echoes_flow::error::Error::InvalidInput(e.to_string()))
    })
}

fn cluster_component(
    name: &str,
    settings: &Settings,
    cluster: &ClusterSettings,
    machine: &MachineSettings,
    range_prefix: &str,
    subnet_output: &str,
    deps: &StackDeps,
) -> Component {
    let action = deps
        .action(cluster_spec(settings, cluster, machine, range_prefix))
        .sensitive_output("cluster_ca_certificate");
    component(
        name,
        ComponentKind::Cluster,
        action,
        settings.timeouts.clusters,
    )
    .depends_on(names::NETWORK)
    .input("vpc_id", Deferred::output(names::NETWORK, "vpc_id"))
    .input("subnet_id", Deferred::output(names::NETWORK, subnet_output))
}

/// Builds the infrastructure stack: shared VPC, two GKE clusters and their
/// add-ons.
///
/// ```text
/// main-network ─┬─ app-cluster ──────── app-addons
///               └─ monitoring-cluster ─ monitoring-addons
/// ```
///
/// # Errors
///
/// Returns [`crate::error::Error::Flow`] if the graph cannot be assembled.
pub fn infrastructure_stack(settings: &Settings, deps: &StackDeps) -> Result<DependencyGraph> {
    let timeouts = &settings.timeouts;
    let project = settings.project.id.as_str();
    let mut graph = DependencyGraph::new();

    graph.add_component(component(
        names::NETWORK,
        ComponentKind::Network,
        deps.action(network_spec(settings)),
        timeouts.network,
    ))?;

    graph.add_component(cluster_component(
        names::APP_CLUSTER,
        settings,
        &settings.app_cluster,
        &settings.node_pool.app_cluster,
        "app",
        "app_subnet_id",
        deps,
    ))?;

    graph.add_component(cluster_component(
        names::MONITORING_CLUSTER,
        settings,
        &settings.monitoring_cluster,
        &settings.node_pool.monitoring_cluster,
        "monitoring",
        "monitoring_subnet_id",
        deps,
    ))?;

    let ingress = ChartRef::new("nginx-ingress", "ingress-nginx")
        .version(INGRESS_NGINX_VERSION)
        .repository(INGRESS_NGINX_REPO)
        .namespace("ingress-nginx")
        .values(json!({
            "controller": {
                "replicaCount": 1,
                "service": {"type": "LoadBalancer"},
                "resources": {
                    "requests": {"memory": "64Mi", "cpu": "100m"},
                    "limits": {"memory": "128Mi", "cpu": "200m"},
                },
            },
        }));
    let app_addons = ResourceSpec::new(resource_types::ADDONS)
        .with_properties(json!({
            "namespaces": ["ingress-nginx", "tailscale"],
            "oauth": tailscale_oauth(
                "APP_TAILSCALE_OAUTH_CLIENT_ID",
                "APP_TAILSCALE_OAUTH_CLIENT_SECRET",
            ),
        }))
        .with_chart(ingress)
        .with_chart(tailscale_chart("app-tailscale-operator"));
    graph.add_component(
        component(
            names::APP_ADDONS,
            ComponentKind::AddonSet,
            deps.action(app_addons)
                .require_secret("APP_TAILSCALE_OAUTH_CLIENT_ID")
                .require_secret("APP_TAILSCALE_OAUTH_CLIENT_SECRET"),
            timeouts.addons,
        )
        .depends_on(names::NETWORK)
        .depends_on(names::APP_CLUSTER)
        .input(
            "kubeconfig",
            kubeconfig_input(names::APP_CLUSTER, project, &settings.app_cluster.zone),
        ),
    )?;

    let monitoring_addons = ResourceSpec::new(resource_types::ADDONS)
        .with_properties(json!({
            "namespaces": ["monitoring", "tailscale"],
            "oauth": tailscale_oauth(
                "MONITORING_TAILSCALE_OAUTH_CLIENT_ID",
                "MONITORING_TAILSCALE_OAUTH_SECRET",
            ),
        }))
        .with_chart(tailscale_chart("monitoring-tailscale-operator"));
    graph.add_component(
        component(
            names::MONITORING_ADDONS,
            ComponentKind::AddonSet,
            deps.action(monitoring_addons)
                .require_secret("MONITORING_TAILSCALE_OAUTH_CLIENT_ID")
                .require_secret("MONITORING_TAILSCALE_OAUTH_SECRET"),
            timeouts.addons,
        )
        .depends_on(names::NETWORK)
        .depends_on(names::MONITORING_CLUSTER)
        .input(
            "kubeconfig",
            kubeconfig_input(
                names::MONITORING_CLUSTER,
                project,
                &settings.monitoring_cluster.zone,
            ),
        ),
    )?;

    for (export, component, key) in [
        ("app_cluster_name", names::APP_CLUSTER, "cluster_name"),
        ("app_cluster_endpoint", names::APP_CLUSTER, "endpoint"),
        ("monitoring_cluster_name", names::MONITORING_CLUSTER, "cluster_name"),
        ("monitoring_cluster_endpoint", names::MONITORING_CLUSTER, "endpoint"),
        ("vpc_name", names::NETWORK, "vpc_name"),
        ("vpc_id", names::NETWORK, "vpc_id"),
    ] {
        graph.export(export, Deferred::output(component, key))?;
    }

    graph.validate()?;
    debug!(components = graph.len(), "infrastructure stack assembled");
    Ok(graph)
}

fn with_manifests(spec: ResourceSpec, dir: &str, files: &[&str]) -> ResourceSpec {
    let dir = dir.trim_end_matches('/');
    files.iter().fold(spec, |spec, file| {
        spec.with_manifest(ManifestRef::new(format!("{dir}/{file}")))
    })
}

/// Builds the workload stack deployed onto the application cluster.
///
/// ```text
/// network ─┬─ postgres ─ app
///          ├─────────────┘
///          └─ monitoring
/// ```
///
/// Every component receives the cluster kubeconfig as its `kubeconfig` input.
///
/// # Errors
///
/// Returns [`crate::error::Error::Yaml`] if the kubeconfig cannot be rendered
/// or [`crate::error::Error::Flow`] if the graph cannot be assembled.
pub fn workload_stack(
    settings: &Settings,
    access: &ClusterAccess,
    deps: &StackDeps,
) -> Result<DependencyGraph> {
    let timeouts = &settings.timeouts;
    let dir = settings.workload.manifest_dir.as_str();
    let kubeconfig = Value::String(create_kubeconfig(
        &access.cluster_name,
        &access.endpoint,
        &access.cluster_ca,
        &settings.project.id,
        &settings.app_cluster.zone,
    )?);
    let mut graph = DependencyGraph::new();

    let policies = with_manifests(
        ResourceSpec::new(resource_types::NETWORK_POLICY),
        dir,
        &["network/base-policies.yaml"],
    );
    graph.add_component(
        component(
            names::POLICIES,
            ComponentKind::NetworkPolicy,
            deps.action(policies),
            timeouts.network_policies,
        )
        .input("kubeconfig", kubeconfig.clone()),
    )?;

    let postgres = with_manifests(
        ResourceSpec::new(resource_types::DATABASE).with_properties(json!({
            "secret_name": POSTGRES_SECRET_NAME,
            "password_secret": POSTGRES_PASSWORD,
            "user": "he-user",
            "database": "phrases",
        })),
        dir,
        &[
            "postgres/configmap.yaml",
            "postgres/network-policy.yaml",
            "postgres/statefulset.yaml",
        ],
    );
    graph.add_component(
        component(
            names::POSTGRES,
            ComponentKind::Database,
            deps.action(postgres)
                .require_secret(POSTGRES_PASSWORD)
                .sensitive_output("password"),
            timeouts.database,
        )
        .depends_on(names::POLICIES)
        .input("kubeconfig", kubeconfig.clone()),
    )?;

    let app = with_manifests(
        ResourceSpec::new(resource_types::APP),
        dir,
        &[
            "app/deployment.yaml",
            "app/ingress-app.yaml",
            "app/ingress-metrics.yaml",
            "app/network-policy.yaml",
            "app/service.yaml",
        ],
    );
    graph.add_component(
        component(
            names::APP,
            ComponentKind::AppDeployment,
            deps.action(app),
            timeouts.app,
        )
        .depends_on(names::POLICIES)
        .depends_on(names::POSTGRES)
        .input("secret_name", Deferred::output(names::POSTGRES, "secret_name"))
        .input("kubeconfig", kubeconfig.clone()),
    )?;

    let monitoring = with_manifests(
        ResourceSpec::new(resource_types::MONITORING),
        dir,
        &["monitoring/config.yaml"],
    );
    graph.add_component(
        component(
            names::MONITORING,
            ComponentKind::MonitoringDeployment,
            deps.action(monitoring),
            timeouts.monitoring,
        )
        .depends_on(names::POLICIES)
        .input("kubeconfig", kubeconfig),
    )?;

    graph.export("app_url", settings.workload.app_url.as_str())?;
    graph.export("metrics_url", settings.workload.metrics_url.as_str())?;

    graph.validate()?;
    debug!(components = graph.len(), "workload stack assembled");
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dry_run::DryRunProvider;
    use crate::settings::tests::sample;
    use echoes_flow::outputs::OutputRegistry;
    use echoes_flow::secrets::StaticSecrets;

    fn deps() -> StackDeps {
        StackDeps::new(Arc::new(DryRunProvider), Arc::new(StaticSecrets::new()))
    }

    fn access() -> ClusterAccess {
        ClusterAccess {
            cluster_name: "app-cluster".into(),
            endpoint: "34.1.2.3".into(),
            cluster_ca: "Q0E=".into(),
        }
    }

    #[test]
    fn infrastructure_order_puts_network_first() {
        let graph = infrastructure_stack(&sample(), &deps()).unwrap();
        let order = graph.topological_order().unwrap();

        assert_eq!(order.len(), 5);
        assert_eq!(order[0], names::NETWORK);
        let pos = |n: &str| order.iter().position(|c| c == n).unwrap();
        assert!(pos(names::APP_CLUSTER) < pos(names::APP_ADDONS));
        assert!(pos(names::MONITORING_CLUSTER) < pos(names::MONITORING_ADDONS));
    }

    #[test]
    fn addons_depend_on_network_and_their_cluster() {
        let graph = infrastructure_stack(&sample(), &deps()).unwrap();
        let mut upstream = graph.dependencies_of(names::APP_ADDONS).unwrap();
        upstream.sort();
        assert_eq!(upstream, vec![names::APP_CLUSTER, names::NETWORK]);
    }

    #[test]
    fn cluster_timeouts_come_from_settings() {
        let graph = infrastructure_stack(&sample(), &deps()).unwrap();
        let cluster = graph.component(names::APP_CLUSTER).unwrap();
        assert_eq!(
            cluster.timeouts().create,
            std::time::Duration::from_secs(45 * 60)
        );
        assert!(cluster.deletion_policy().delete_before_replace);
    }

    #[test]
    fn infrastructure_exports_match_cluster_outputs() {
        let graph = infrastructure_stack(&sample(), &deps()).unwrap();
        let exports: Vec<&str> = graph.exports().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            exports,
            vec![
                "app_cluster_name",
                "app_cluster_endpoint",
                "monitoring_cluster_name",
                "monitoring_cluster_endpoint",
                "vpc_name",
                "vpc_id",
            ]
        );
    }

    #[test]
    fn workload_app_waits_for_postgres() {
        let graph = workload_stack(&sample(), &access(), &deps()).unwrap();
        let mut upstream = graph.dependencies_of(names::APP).unwrap();
        upstream.sort();
        assert_eq!(upstream, vec![names::POLICIES, names::POSTGRES]);
        assert_eq!(
            graph.dependents_of(names::POLICIES).unwrap().len(),
            3,
            "postgres, app and monitoring follow the policies"
        );
    }

    #[test]
    fn kubeconfig_input_rejects_non_string_cluster_outputs() {
        let registry = OutputRegistry::new();
        registry
            .publish(names::APP_CLUSTER, "cluster_name", json!("app-cluster"), false)
            .unwrap();
        registry
            .publish(names::APP_CLUSTER, "endpoint", Value::Null, false)
            .unwrap();
        registry
            .publish(names::APP_CLUSTER, "cluster_ca_certificate", json!(42), true)
            .unwrap();

        let input = kubeconfig_input(names::APP_CLUSTER, "hungry-echoes", "us-west3-a");
        let err = input.resolve(&registry).unwrap_err();

        assert!(matches!(err, echoes_flow::error::Error::InvalidInput(_)));
        assert!(err.to_string().contains("app-cluster.endpoint"), "{err}");
    }

    #[test]
    fn kubeconfig_input_resolves_once_cluster_outputs_exist() {
        let registry = OutputRegistry::new();
        for (key, value) in [
            ("cluster_name", "app-cluster"),
            ("endpoint", "34.1.2.3"),
            ("cluster_ca_certificate", "Q0E="),
        ] {
            registry
                .publish(names::APP_CLUSTER, key, json!(value), false)
                .unwrap();
        }

        let input = kubeconfig_input(names::APP_CLUSTER, "hungry-echoes", "us-west3-a");
        let rendered = input.resolve(&registry).unwrap();

        assert!(
            rendered
                .as_str()
                .unwrap()
                .contains("server: https://34.1.2.3")
        );
    }

    #[test]
    fn manifest_paths_are_rooted_at_the_manifest_dir() {
        let spec = with_manifests(ResourceSpec::new("t"), "k8s/", &["app/service.yaml"]);
        let paths: Vec<&str> = spec.manifests.iter().map(ManifestRef::as_str).collect();
        assert_eq!(paths, vec!["k8s/app/service.yaml"]);
    }
}
