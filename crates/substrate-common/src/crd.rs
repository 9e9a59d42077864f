//! Substrate Custom Resource Definition
//!
//! A Substrate represents a tenant cluster whose control plane is built by
//! other controllers. Once its status reports ready, the address and
//! kubeconfig of the tenant API server are populated and add-ons can be
//! provisioned onto it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::TENANT_API_SERVER_PORT;

/// Specification for a Substrate
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kit.k8s.sh",
    version = "v1alpha1",
    kind = "Substrate",
    plural = "substrates",
    status = "SubstrateStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Address","type":"string","jsonPath":".status.cluster.address"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SubstrateSpec {
    /// Instance type for tenant control plane nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
}

/// Status for a Substrate
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubstrateStatus {
    /// Set once the tenant control plane is reachable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,

    /// Tenant cluster connection details
    #[serde(default)]
    pub cluster: ClusterStatus,
}

/// Connection details of the tenant cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Host (IP or DNS name) of the tenant API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Kubeconfig for the tenant cluster
    ///
    /// Either the path of a kubeconfig file readable by the operator, or
    /// the kubeconfig YAML itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_config: Option<String>,
}

impl Substrate {
    /// True once the status has explicitly been marked ready
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.ready)
            .unwrap_or(false)
    }

    /// Tenant API server address, if set and non-empty
    pub fn address(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.cluster.address.as_deref())
            .filter(|a| !a.is_empty())
    }

    /// Tenant API server endpoint (`https://{address}:8443`)
    pub fn api_endpoint(&self) -> Option<String> {
        self.address()
            .map(|address| format!("https://{}:{}", address, TENANT_API_SERVER_PORT))
    }

    /// Tenant kubeconfig, if set and non-empty
    pub fn kubeconfig(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.cluster.kube_config.as_deref())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Name of a cloud resource derived from the substrate name
///
/// Cloud identities (roles, instance profiles) created for a substrate are
/// named `{substrate}-{suffix}`.
pub fn discovery_name(substrate_name: &str, suffix: &str) -> String {
    format!("{}-{}", substrate_name, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn substrate(status: Option<SubstrateStatus>) -> Substrate {
        let mut s = Substrate::new("dev", SubstrateSpec::default());
        s.status = status;
        s
    }

    #[test]
    fn readiness_requires_explicit_true() {
        assert!(!substrate(None).is_ready());
        assert!(!substrate(Some(SubstrateStatus::default())).is_ready());
        assert!(!substrate(Some(SubstrateStatus {
            ready: Some(false),
            ..Default::default()
        }))
        .is_ready());
        assert!(substrate(Some(SubstrateStatus {
            ready: Some(true),
            ..Default::default()
        }))
        .is_ready());
    }

    #[test]
    fn endpoint_uses_tenant_api_port() {
        let s = substrate(Some(SubstrateStatus {
            ready: Some(true),
            cluster: ClusterStatus {
                address: Some("10.0.12.7".to_string()),
                kube_config: Some("apiVersion: v1".to_string()),
            },
        }));
        assert_eq!(s.api_endpoint().as_deref(), Some("https://10.0.12.7:8443"));
        assert_eq!(s.kubeconfig(), Some("apiVersion: v1"));
    }

    #[test]
    fn blank_fields_are_treated_as_missing() {
        let s = substrate(Some(SubstrateStatus {
            ready: Some(true),
            cluster: ClusterStatus {
                address: Some(String::new()),
                kube_config: Some("  \n".to_string()),
            },
        }));
        assert!(s.api_endpoint().is_none());
        assert!(s.kubeconfig().is_none());
    }

    #[test]
    fn status_uses_camel_case_fields() {
        let status: SubstrateStatus = serde_json::from_value(serde_json::json!({
            "ready": true,
            "cluster": { "address": "a.example", "kubeConfig": "kc" }
        }))
        .expect("status should parse");
        assert_eq!(status.cluster.kube_config.as_deref(), Some("kc"));
    }

    #[test]
    fn discovery_name_joins_with_dash() {
        assert_eq!(
            discovery_name("dev", "tenant-controlplane-node-role"),
            "dev-tenant-controlplane-node-role"
        );
    }

    #[test]
    fn crd_is_cluster_scoped() {
        let crd = Substrate::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "kit.k8s.sh");
    }
}
