//! Kubeconfig for GKE clusters.
//!
//! Authentication goes through the `gke-gcloud-auth-plugin` exec plugin, so
//! the document holds no credentials beyond the cluster CA.

use serde::{Deserialize, Serialize};

use crate::error::Result;

const EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1beta1";
const AUTH_PLUGIN: &str = "gke-gcloud-auth-plugin";

/// A single-cluster kubeconfig document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    /// Always `v1`.
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Always `Config`.
    pub kind: String,
    /// Name of the only context.
    pub current_context: String,
    /// Empty preferences block.
    pub preferences: Preferences,
    /// Cluster entries.
    pub clusters: Vec<NamedCluster>,
    /// Context entries.
    pub contexts: Vec<NamedContext>,
    /// User entries.
    pub users: Vec<NamedUser>,
}

/// Empty `preferences` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {}

/// A named cluster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCluster {
    /// Entry name.
    pub name: String,
    /// API server connection.
    pub cluster: ClusterEntry,
}

/// API server connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    /// Base64 cluster CA, as reported by GKE.
    pub certificate_authority_data: String,
    /// `https://` URL of the API server.
    pub server: String,
}

/// A named context entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedContext {
    /// Entry name.
    pub name: String,
    /// Cluster and user pairing.
    pub context: ContextEntry,
}

/// Cluster and user pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Cluster entry name.
    pub cluster: String,
    /// User entry name.
    pub user: String,
}

/// A named user entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedUser {
    /// Entry name.
    pub name: String,
    /// Credentials source.
    pub user: UserEntry,
}

/// Credentials source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    /// Exec plugin configuration.
    pub exec: ExecConfig,
}

/// Exec credential plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecConfig {
    /// Credential API version.
    pub api_version: String,
    /// Plugin binary.
    pub command: String,
    /// Pass cluster info to the plugin.
    pub provide_cluster_info: bool,
}

/// GKE naming of context, cluster and user entries.
#[must_use]
pub fn context_name(project_id: &str, zone: &str, cluster_name: &str) -> String {
    format!("gke_{project_id}_{zone}_{cluster_name}")
}

impl Kubeconfig {
    /// Builds the kubeconfig of one GKE cluster.
    ///
    /// Context, cluster and user entries all share the
    /// `gke_{project}_{zone}_{cluster}` name.
    #[must_use]
    pub fn for_gke(
        cluster_name: &str,
        endpoint: &str,
        cluster_ca: &str,
        project_id: &str,
        zone: &str,
    ) -> Self {
        let name = context_name(project_id, zone, cluster_name);
        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            current_context: name.clone(),
            preferences: Preferences::default(),
            clusters: vec![NamedCluster {
                name: name.clone(),
                cluster: ClusterEntry {
                    certificate_authority_data: cluster_ca.to_string(),
                    server: format!("https://{endpoint}"),
                },
            }],
            contexts: vec![NamedContext {
                name: name.clone(),
                context: ContextEntry {
                    cluster: name.clone(),
                    user: name.clone(),
                },
            }],
            users: vec![NamedUser {
                name,
                user: UserEntry {
                    exec: ExecConfig {
                        api_version: EXEC_API_VERSION.to_string(),
                        command: AUTH_PLUGIN.to_string(),
                        provide_cluster_info: true,
                    },
                },
            }],
        }
    }

    /// Serializes to YAML.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Yaml`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Builds the GKE kubeconfig and renders it as YAML.
///
/// # Errors
///
/// Returns [`crate::error::Error::Yaml`] if serialization fails.
pub fn create_kubeconfig(
    cluster_name: &str,
    endpoint: &str,
    cluster_ca: &str,
    project_id: &str,
    zone: &str,
) -> Result<String> {
    Kubeconfig::for_gke(cluster_name, endpoint, cluster_ca, project_id, zone).to_yaml()
}
