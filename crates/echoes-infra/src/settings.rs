//! Deployment settings.
//!
//! Settings are loaded once from a YAML document and passed explicitly to
//! the stack builders. Every key except `timeouts` and `workload` is
//! required; unknown keys are rejected.
//!
//! ```yaml
//! project:
//!   id: hungry-echoes
//! network:
//!   name: echoes-vpc
//!   health_check_ranges: ["35.191.0.0/16", "130.211.0.0/22"]
//!   app_cluster:
//!     region: us-west3
//!     subnet_cidr: 10.0.0.0/20
//!     pods_cidr: 10.4.0.0/14
//!     services_cidr: 10.8.0.0/20
//!   monitoring_cluster:
//!     region: us-west4
//!     subnet_cidr: 10.16.0.0/20
//!     pods_cidr: 10.20.0.0/14
//!     services_cidr: 10.24.0.0/20
//! app_cluster:
//!   name: app-cluster
//!   zone: us-west3-a
//! monitoring_cluster:
//!   name: monitoring-cluster
//!   zone: us-west4-a
//! node_pool:
//!   node_count: 1
//!   node_version: "1.30"
//!   disk_size_gb: 50
//!   disk_type: pd-standard
//!   image_type: COS_CONTAINERD
//!   app_cluster:
//!     machine_type: e2-standard-2
//!   monitoring_cluster:
//!     machine_type: e2-standard-2
//! timeouts:
//!   clusters: 45m
//! ```

use std::path::Path;
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Root of the settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// GCP project.
    pub project: ProjectSettings,
    /// Shared VPC and subnets.
    pub network: NetworkSettings,
    /// Application cluster.
    pub app_cluster: ClusterSettings,
    /// Monitoring cluster.
    pub monitoring_cluster: ClusterSettings,
    /// Node pools of both clusters.
    pub node_pool: NodePoolSettings,
    /// Per component group deadlines.
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    /// Workload stack settings.
    #[serde(default)]
    pub workload: WorkloadSettings,
}

/// GCP project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSettings {
    /// Project id.
    pub id: String,
}

/// VPC layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSettings {
    /// VPC name.
    pub name: String,
    /// Source ranges allowed to reach health check ports.
    pub health_check_ranges: Vec<String>,
    /// Subnet of the application cluster.
    pub app_cluster: SubnetSettings,
    /// Subnet of the monitoring cluster.
    pub monitoring_cluster: SubnetSettings,
}

/// One subnet with its secondary ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubnetSettings {
    /// Region the subnet lives in.
    pub region: String,
    /// Primary range.
    pub subnet_cidr: String,
    /// Secondary range for pods.
    pub pods_cidr: String,
    /// Secondary range for services.
    pub services_cidr: String,
}

/// A GKE cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSettings {
    /// Cluster name.
    pub name: String,
    /// Zone, e.g. `us-west3-a`.
    pub zone: String,
}

impl ClusterSettings {
    /// The region the zone belongs to.
    #[must_use]
    pub fn region(&self) -> &str {
        region_from_zone(&self.zone)
    }
}

/// Node pool shape shared by both clusters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodePoolSettings {
    /// Nodes per pool.
    pub node_count: u32,
    /// GKE node version.
    pub node_version: String,
    /// Boot disk size.
    pub disk_size_gb: u32,
    /// Boot disk type.
    pub disk_type: String,
    /// Node image.
    pub image_type: String,
    /// Machine type of the application pool.
    pub app_cluster: MachineSettings,
    /// Machine type of the monitoring pool.
    pub monitoring_cluster: MachineSettings,
}

/// Machine shape of one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineSettings {
    /// GCE machine type.
    pub machine_type: String,
}

/// Deadlines per component group, written as `humantime` strings.
///
/// Each deadline applies to create, update and delete alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSettings {
    /// VPC, subnets and firewall rules.
    #[serde(with = "humantime_serde")]
    pub network: Duration,
    /// GKE clusters.
    #[serde(with = "humantime_serde")]
    pub clusters: Duration,
    /// Helm add-ons.
    #[serde(with = "humantime_serde")]
    pub addons: Duration,
    /// Workload network policies.
    #[serde(with = "humantime_serde")]
    pub network_policies: Duration,
    /// Workload database.
    #[serde(with = "humantime_serde")]
    pub database: Duration,
    /// Workload application.
    #[serde(with = "humantime_serde")]
    pub app: Duration,
    /// Workload monitoring configuration.
    #[serde(with = "humantime_serde")]
    pub monitoring: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        const MINUTE: u64 = 60;
        Self {
            network: Duration::from_secs(30 * MINUTE),
            clusters: Duration::from_secs(45 * MINUTE),
            addons: Duration::from_secs(20 * MINUTE),
            network_policies: Duration::from_secs(10 * MINUTE),
            database: Duration::from_secs(15 * MINUTE),
            app: Duration::from_secs(10 * MINUTE),
            monitoring: Duration::from_secs(10 * MINUTE),
        }
    }
}

/// Settings of the workload stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkloadSettings {
    /// Public application URL, exported as `app_url`.
    pub app_url: String,
    /// Public metrics URL, exported as `metrics_url`.
    pub metrics_url: String,
    /// Directory holding the Kubernetes manifests.
    pub manifest_dir: String,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            app_url: "http://hungryechoes.com".to_string(),
            metrics_url: "http://metrics.hungryechoes.com".to_string(),
            manifest_dir: "k8s".to_string(),
        }
    }
}

impl Settings {
    /// Parses and validates a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Yaml`] for malformed or incomplete documents and
    /// [`Error::Config`] for values that fail validation.
    pub fn from_yaml(document: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(document)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads, parses and validates a settings file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise as
    /// [`Settings::from_yaml`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_yaml(&document)?;
        debug!(path = %path.display(), project = %settings.project.id, "loaded settings");
        Ok(settings)
    }

    /// Checks values serde cannot check.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        non_empty("project.id", &self.project.id)?;
        non_empty("network.name", &self.network.name)?;
        for (i, range) in self.network.health_check_ranges.iter().enumerate() {
            cidr(&format!("network.health_check_ranges[{i}]"), range)?;
        }
        for (prefix, subnet) in [
            ("network.app_cluster", &self.network.app_cluster),
            ("network.monitoring_cluster", &self.network.monitoring_cluster),
        ] {
            non_empty(&format!("{prefix}.region"), &subnet.region)?;
            cidr(&format!("{prefix}.subnet_cidr"), &subnet.subnet_cidr)?;
            cidr(&format!("{prefix}.pods_cidr"), &subnet.pods_cidr)?;
            cidr(&format!("{prefix}.services_cidr"), &subnet.services_cidr)?;
        }
        for (prefix, cluster) in [
            ("app_cluster", &self.app_cluster),
            ("monitoring_cluster", &self.monitoring_cluster),
        ] {
            non_empty(&format!("{prefix}.name"), &cluster.name)?;
            zone(&format!("{prefix}.zone"), &cluster.zone)?;
        }
        if self.node_pool.node_count == 0 {
            return Err(Error::config("node_pool.node_count", "must be at least 1"));
        }
        non_empty("node_pool.node_version", &self.node_pool.node_version)?;
        non_empty(
            "node_pool.app_cluster.machine_type",
            &self.node_pool.app_cluster.machine_type,
        )?;
        non_empty(
            "node_pool.monitoring_cluster.machine_type",
            &self.node_pool.monitoring_cluster.machine_type,
        )?;
        Ok(())
    }
}

/// Returns the region of a zone: everything before the last `-`.
///
/// ```rust
/// use echoes_infra::settings::region_from_zone;
///
/// assert_eq!(region_from_zone("us-west3-a"), "us-west3");
/// ```
#[must_use]
pub fn region_from_zone(zone: &str) -> &str {
    zone.rsplit_once('-').map_or(zone, |(region, _)| region)
}

fn non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::config(field, "must not be empty"));
    }
    Ok(())
}

fn zone(field: &str, value: &str) -> Result<()> {
    non_empty(field, value)?;
    match value.rsplit_once('-') {
        Some((region, suffix)) if !region.is_empty() && !suffix.is_empty() => Ok(()),
        _ => Err(Error::config(
            field,
            format!("'{value}' is not a zone like us-west3-a"),
        )),
    }
}

fn cidr(field: &str, value: &str) -> Result<()> {
    let invalid = || Error::config(field, format!("'{value}' is not a CIDR like 10.0.0.0/20"));
    let net: Ipv4Net = value.parse().map_err(|_| invalid())?;
    // Only the canonical spelling is accepted.
    if net.to_string() != value {
        return Err(invalid());
    }
    Ok(())
}
