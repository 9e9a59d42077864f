//! Cluster state seen by the add-on reconciler and the readiness gate

use substrate_common::crd::Substrate;
use tracing::warn;

/// Read-only view of the cluster that owns the add-ons
pub trait ClusterState: Send + Sync {
    /// Stable cluster name
    fn name(&self) -> String;

    /// Readiness predicate reported by the cluster object
    fn is_ready(&self) -> bool;

    /// API endpoint of the tenant cluster
    fn api_endpoint(&self) -> Option<String>;

    /// Credential used to target the tenant cluster (kubeconfig path or YAML)
    fn kubeconfig(&self) -> Option<String>;
}

impl ClusterState for Substrate {
    fn name(&self) -> String {
        kube::ResourceExt::name_any(self)
    }

    fn is_ready(&self) -> bool {
        Substrate::is_ready(self)
    }

    fn api_endpoint(&self) -> Option<String> {
        Substrate::api_endpoint(self)
    }

    fn kubeconfig(&self) -> Option<String> {
        Substrate::kubeconfig(self).map(str::to_string)
    }
}

/// Snapshot of a ready cluster, stable for the duration of one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTarget {
    /// Cluster name
    pub name: String,
    /// Tenant API endpoint
    pub endpoint: String,
    /// Tenant kubeconfig (path or YAML)
    pub kubeconfig: String,
}

/// Readiness gate
///
/// Returns a target only when the cluster reports ready and both the
/// endpoint and the credential are populated. Side-effect free.
pub fn ready_target(cluster: &dyn ClusterState) -> Option<ClusterTarget> {
    if !cluster.is_ready() {
        return None;
    }

    match (cluster.api_endpoint(), cluster.kubeconfig()) {
        (Some(endpoint), Some(kubeconfig)) => Some(ClusterTarget {
            name: cluster.name(),
            endpoint,
            kubeconfig,
        }),
        (endpoint, kubeconfig) => {
            warn!(
                cluster = %cluster.name(),
                has_endpoint = endpoint.is_some(),
                has_kubeconfig = kubeconfig.is_some(),
                "cluster reports ready without connection details"
            );
            None
        }
    }
}
