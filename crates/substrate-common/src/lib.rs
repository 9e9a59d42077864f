//! Common types for substrate add-on provisioning: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::{AddonError, AddonErrors, Error, Stage};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Port the tenant API server listens on
pub const TENANT_API_SERVER_PORT: u16 = 8443;

/// Discovery-name suffix of the tenant control plane node role
pub const TENANT_CONTROL_PLANE_NODE_ROLE: &str = "tenant-controlplane-node-role";

/// Field manager / controller name used when talking to the API server
pub const CONTROLLER_NAME: &str = "substrate-addons";
