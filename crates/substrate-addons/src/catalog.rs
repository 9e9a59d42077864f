//! Add-on catalog configuration and descriptor building
//!
//! The catalog is held as data so it can be swapped for a synthetic one in
//! tests or overridden from a YAML file. Values that depend on the cluster
//! identity are declared as bindings and resolved per pass by
//! [`build_descriptors`].

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use substrate_common::crd::discovery_name;
use substrate_common::{AddonError, AddonErrors, Error, Stage, TENANT_CONTROL_PLANE_NODE_ROLE};

use crate::cluster::ClusterTarget;

/// Configuration values passed to a release
pub type Values = Map<String, Value>;

const KIT_OPERATOR_CHART: &str = "https://github.com/awslabs/kubernetes-iteration-toolkit/releases/download/kit-operator-0.0.5/kit-operator-0.0.5.tgz";
const KARPENTER_CHART: &str = "https://charts.karpenter.sh/karpenter-0.5.5.tgz";
const AWS_VPC_CNI_CHART: &str = "https://aws.github.io/eks-charts/aws-vpc-cni-1.1.13.tgz";
const AWS_EBS_CSI_DRIVER_CHART: &str = "https://github.com/kubernetes-sigs/aws-ebs-csi-driver/releases/download/helm-chart-aws-ebs-csi-driver-2.6.3/aws-ebs-csi-driver-2.6.3.tgz";
const AWS_LB_CONTROLLER_CHART: &str =
    "https://aws.github.io/eks-charts/aws-load-balancer-controller-1.4.0.tgz";

/// Cluster identity fields that can be injected into add-on values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClusterField {
    /// Cluster name
    ClusterName,
    /// Tenant API endpoint
    ApiEndpoint,
    /// Cloud identity named `{cluster}-{suffix}`
    DiscoveryName,
}

/// Injects a cluster identity field at a dotted path in the values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueBinding {
    /// Dotted path into the values, e.g. `controller.clusterName`
    pub path: String,
    /// Field to inject
    pub field: ClusterField,
    /// Suffix for [`ClusterField::DiscoveryName`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl ValueBinding {
    /// Bind `field` at `path`
    pub fn new(path: impl Into<String>, field: ClusterField) -> Self {
        Self {
            path: path.into(),
            field,
            suffix: None,
        }
    }

    /// Bind a discovery name with the given suffix at `path`
    pub fn discovery_name(path: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            field: ClusterField::DiscoveryName,
            suffix: Some(suffix.into()),
        }
    }

    fn resolve(&self, target: &ClusterTarget) -> String {
        match self.field {
            ClusterField::ClusterName => target.name.clone(),
            ClusterField::ApiEndpoint => target.endpoint.clone(),
            ClusterField::DiscoveryName => {
                discovery_name(&target.name, self.suffix.as_deref().unwrap_or_default())
            }
        }
    }
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonSpec {
    /// Release name, unique within the catalog
    pub release_name: String,
    /// Bundle location (`https://`, `file://` or an absolute path)
    pub location: String,
    /// Target namespace on the tenant cluster
    pub namespace: String,
    /// Static values
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub values: Values,
    /// Values derived from the cluster identity
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<ValueBinding>,
}

impl AddonSpec {
    /// Entry without values
    pub fn new(
        release_name: impl Into<String>,
        namespace: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            release_name: release_name.into(),
            location: location.into(),
            namespace: namespace.into(),
            values: Values::new(),
            bindings: Vec::new(),
        }
    }

    /// Replace the static values
    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    /// Set one top-level static value
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Add a cluster identity binding
    pub fn with_binding(mut self, binding: ValueBinding) -> Self {
        self.bindings.push(binding);
        self
    }
}

/// The fixed set of add-ons provisioned onto every tenant cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogConfig {
    /// Catalog entries, in provisioning order
    pub addons: Vec<AddonSpec>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            addons: vec![
                AddonSpec::new("aws-vpc-cni", "kube-system", AWS_VPC_CNI_CHART),
                AddonSpec::new("kit-operator", "kit", KIT_OPERATOR_CHART),
                AddonSpec::new("karpenter", "karpenter", KARPENTER_CHART)
                    .with_value(
                        "controller",
                        serde_json::json!({ "resources": { "requests": { "cpu": "100m" } } }),
                    )
                    .with_binding(ValueBinding::new(
                        "controller.clusterName",
                        ClusterField::ClusterName,
                    ))
                    .with_binding(ValueBinding::new(
                        "controller.clusterEndpoint",
                        ClusterField::ApiEndpoint,
                    ))
                    .with_binding(ValueBinding::discovery_name(
                        "aws.defaultInstanceProfile",
                        TENANT_CONTROL_PLANE_NODE_ROLE,
                    )),
                AddonSpec::new("aws-ebs-csi-driver", "kube-system", AWS_EBS_CSI_DRIVER_CHART)
                    .with_value("controller", serde_json::json!({ "replicaCount": "1" })),
                AddonSpec::new(
                    "aws-load-balancer-controller",
                    "kube-system",
                    AWS_LB_CONTROLLER_CHART,
                )
                .with_value("replicaCount", "1")
                .with_binding(ValueBinding::new("clusterName", ClusterField::ClusterName)),
            ],
        }
    }
}

impl CatalogConfig {
    /// Parse and validate a catalog from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization_for("CatalogConfig", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a catalog file
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::internal_with_context(
                "catalog",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        Self::from_yaml(&yaml)
    }

    /// Check structural invariants of the catalog
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = HashSet::new();

        for (i, addon) in self.addons.iter().enumerate() {
            let field = |name: &str| format!("addons[{}].{}", i, name);

            if addon.release_name.is_empty() {
                return Err(Error::validation_for_field(
                    field("releaseName"),
                    "release name cannot be empty",
                ));
            }
            if !seen.insert(addon.release_name.as_str()) {
                return Err(Error::validation_for_field(
                    field("releaseName"),
                    format!("duplicate release name {}", addon.release_name),
                ));
            }
            if addon.location.is_empty() {
                return Err(Error::validation_for_field(
                    field("location"),
                    "location cannot be empty",
                ));
            }
            if addon.namespace.is_empty() {
                return Err(Error::validation_for_field(
                    field("namespace"),
                    "namespace cannot be empty",
                ));
            }

            for (j, binding) in addon.bindings.iter().enumerate() {
                let binding_field = format!("addons[{}].bindings[{}]", i, j);
                if binding.path.split('.').any(str::is_empty) {
                    return Err(Error::validation_for_field(
                        binding_field,
                        format!("malformed path {:?}", binding.path),
                    ));
                }
                if binding.field == ClusterField::DiscoveryName
                    && binding.suffix.as_deref().map_or(true, str::is_empty)
                {
                    return Err(Error::validation_for_field(
                        binding_field,
                        "discoveryName binding requires a suffix",
                    ));
                }
            }
        }

        Ok(())
    }
}

/// A fully-resolved add-on, constructed fresh on every pass
#[derive(Debug, Clone, PartialEq)]
pub struct AddonDescriptor {
    /// Bundle location
    pub location: String,
    /// Target namespace
    pub namespace: String,
    /// Release name
    pub release_name: String,
    /// Resolved values
    pub values: Values,
}

/// Catalog builder
///
/// Resolves every entry against the cluster target, preserving catalog
/// order. Every entry whose bindings cannot be applied is reported.
pub fn build_descriptors(
    catalog: &CatalogConfig,
    target: &ClusterTarget,
) -> Result<Vec<AddonDescriptor>, AddonErrors> {
    let mut descriptors = Vec::with_capacity(catalog.addons.len());
    let mut failures = Vec::new();

    for addon in &catalog.addons {
        match build_descriptor(addon, target) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(err) => failures.push(err),
        }
    }

    if failures.is_empty() {
        Ok(descriptors)
    } else {
        Err(failures.into_iter().collect())
    }
}

fn build_descriptor(addon: &AddonSpec, target: &ClusterTarget) -> Result<AddonDescriptor, AddonError> {
    let mut values = addon.values.clone();

    for binding in &addon.bindings {
        set_path(&mut values, &binding.path, Value::String(binding.resolve(target)))
            .map_err(|e| AddonError::new(&addon.release_name, Stage::Catalog, e))?;
    }

    Ok(AddonDescriptor {
        location: addon.location.clone(),
        namespace: addon.namespace.clone(),
        release_name: addon.release_name.clone(),
        values,
    })
}

/// Set `value` at a dotted path, creating intermediate mappings
fn set_path(values: &mut Values, path: &str, value: Value) -> Result<(), Error> {
    let mut segments = path.split('.').peekable();
    let mut current = values;

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return Ok(());
        }

        let next = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match next {
            Value::Object(map) => map,
            other => {
                return Err(Error::validation_for_field(
                    path,
                    format!("cannot set {} through non-mapping value {}", path, other),
                ))
            }
        };
    }

    Err(Error::validation_for_field(path, "empty value path"))
}
