//! Add-on provisioning for substrate tenant clusters
//!
//! This crate provides:
//! - The add-on catalog and the descriptor builder that binds it to a cluster
//! - BundleSource for fetching and loading chart archives
//! - ClusterAccess / ReleaseClient for release history, install and upgrade
//! - AddonReconciler, which runs every add-on concurrently and aggregates failures
//! - The kube-rs controller glue (Context, reconcile, error_policy)

#![deny(missing_docs)]

pub mod bundle;
pub mod catalog;
pub mod cluster;
pub mod controller;
pub mod helm;
pub mod reconciler;
pub mod release;

pub use bundle::{Bundle, BundleMetadata, BundleSource, HttpBundleSource};
pub use catalog::{
    build_descriptors, AddonDescriptor, AddonSpec, CatalogConfig, ClusterField, ValueBinding,
    Values,
};
pub use cluster::{ready_target, ClusterState, ClusterTarget};
pub use controller::{error_policy, reconcile, Context, ContextBuilder};
pub use helm::HelmCli;
pub use reconciler::{lookup_history, AddonAction, AddonReconciler, ReconcileOutcome};
pub use release::{ClusterAccess, HelmClusterAccess, HelmReleaseClient, ReleaseClient, ReleaseHistory};

#[cfg(test)]
pub use bundle::MockBundleSource;
#[cfg(test)]
pub use release::{MockClusterAccess, MockReleaseClient};
