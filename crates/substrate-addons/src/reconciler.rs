//! Add-on reconciliation pass
//!
//! One pass runs the readiness gate, builds the descriptors, then ensures
//! every add-on concurrently. Each add-on independently re-derives whether
//! it needs an install or an upgrade from the release history on the
//! tenant cluster, so there is no state carried between passes.
//!
//! Every add-on runs to completion regardless of its siblings; failures
//! are collected per catalog index and combined into [`AddonErrors`].

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use substrate_common::{AddonError, AddonErrors, Error, Stage};

use crate::bundle::BundleSource;
use crate::catalog::{build_descriptors, AddonDescriptor, CatalogConfig};
use crate::cluster::{ready_target, ClusterState, ClusterTarget};
use crate::release::{ClusterAccess, ReleaseClient, ReleaseHistory};

/// Revisions requested when probing release history
const HISTORY_LIMIT: u32 = 1;

/// Result of one reconciliation pass
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Every add-on is installed or upgraded
    Success,
    /// The cluster is not ready yet; nothing was attempted
    Retry,
    /// One or more add-ons failed; the others were not rolled back
    Failure(AddonErrors),
}

impl ReconcileOutcome {
    /// True for [`ReconcileOutcome::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, ReconcileOutcome::Success)
    }
}

/// What was done to an add-on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddonAction {
    /// First-time install
    Installed,
    /// Upgrade of an existing release
    Upgraded,
}

/// Provisions the catalog onto ready clusters
#[derive(Clone)]
pub struct AddonReconciler {
    catalog: Arc<CatalogConfig>,
    bundles: Arc<dyn BundleSource>,
    access: Arc<dyn ClusterAccess>,
}

impl AddonReconciler {
    /// Create a reconciler, validating the catalog
    pub fn new(
        catalog: CatalogConfig,
        bundles: Arc<dyn BundleSource>,
        access: Arc<dyn ClusterAccess>,
    ) -> Result<Self, Error> {
        catalog.validate()?;
        Ok(Self {
            catalog: Arc::new(catalog),
            bundles,
            access,
        })
    }

    /// The catalog this reconciler provisions
    pub fn catalog(&self) -> &CatalogConfig {
        &self.catalog
    }

    /// Run one pass against `cluster`
    pub async fn create(&self, cluster: &dyn ClusterState) -> ReconcileOutcome {
        let Some(target) = ready_target(cluster) else {
            debug!(cluster = %cluster.name(), "cluster not ready, skipping add-ons");
            return ReconcileOutcome::Retry;
        };

        let descriptors = match build_descriptors(&self.catalog, &target) {
            Ok(descriptors) => descriptors,
            Err(errs) => {
                warn!(
                    cluster = %target.name,
                    failed = ?errs.releases(),
                    error = %errs,
                    "failed to build add-on descriptors"
                );
                return ReconcileOutcome::Failure(errs);
            }
        };

        let results = join_all(
            descriptors
                .iter()
                .map(|descriptor| self.ensure(descriptor, &target)),
        )
        .await;

        for (descriptor, result) in descriptors.iter().zip(&results) {
            match result {
                Ok(action) => debug!(
                    cluster = %target.name,
                    release = %descriptor.release_name,
                    ?action,
                    "add-on ensured"
                ),
                Err(err) => warn!(
                    cluster = %target.name,
                    release = %err.release,
                    stage = err.stage.as_str(),
                    error = %err.source,
                    "add-on failed"
                ),
            }
        }

        match AddonErrors::combine(results) {
            None => {
                info!(cluster = %target.name, count = descriptors.len(), "add-ons ensured");
                ReconcileOutcome::Success
            }
            Some(errs) => ReconcileOutcome::Failure(errs),
        }
    }

    /// Teardown entry point
    ///
    /// Add-ons live inside the tenant cluster and are removed with it, so
    /// nothing is uninstalled here.
    pub async fn delete(&self, cluster: &dyn ClusterState) -> ReconcileOutcome {
        debug!(cluster = %cluster.name(), "add-on teardown is a no-op");
        ReconcileOutcome::Success
    }

    /// Ensure a single add-on: fetch, load, connect, probe history, then
    /// install or upgrade. Each stage's error is returned immediately.
    pub async fn ensure(
        &self,
        descriptor: &AddonDescriptor,
        target: &ClusterTarget,
    ) -> Result<AddonAction, AddonError> {
        let release = descriptor.release_name.as_str();
        let at = move |stage: Stage| move |e: Error| AddonError::new(release, stage, e);

        let archive = self
            .bundles
            .fetch(&descriptor.location)
            .await
            .map_err(at(Stage::Fetch))?;
        let bundle = self.bundles.load(archive).await.map_err(at(Stage::Load))?;
        let client = self
            .access
            .connect(&target.kubeconfig, &descriptor.namespace)
            .map_err(at(Stage::ConfigInit))?;

        match lookup_history(client.as_ref(), release).await? {
            ReleaseHistory::Absent => {
                info!(
                    release,
                    namespace = %descriptor.namespace,
                    version = %bundle.metadata.version,
                    "installing add-on"
                );
                client
                    .install(&bundle, release, &descriptor.values, true)
                    .await
                    .map_err(at(Stage::Install))?;
                Ok(AddonAction::Installed)
            }
            ReleaseHistory::Present => {
                debug!(
                    release,
                    namespace = %descriptor.namespace,
                    version = %bundle.metadata.version,
                    "upgrading add-on"
                );
                client
                    .upgrade(&bundle, release, &descriptor.values)
                    .await
                    .map_err(at(Stage::Upgrade))?;
                Ok(AddonAction::Upgraded)
            }
        }
    }
}

/// History lookup
///
/// Only the existence of a prior revision matters; any error other than
/// "not found" (which the client maps to `Absent`) is a real failure.
pub async fn lookup_history(
    client: &dyn ReleaseClient,
    release: &str,
) -> Result<ReleaseHistory, AddonError> {
    client
        .history(release, HISTORY_LIMIT)
        .await
        .map_err(|e| AddonError::new(release, Stage::History, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{Bundle, BundleMetadata, MockBundleSource};
    use crate::catalog::{AddonSpec, ClusterField, ValueBinding};
    use crate::release::{MockClusterAccess, MockReleaseClient};
    use substrate_common::crd::{ClusterStatus, Substrate, SubstrateSpec, SubstrateStatus};

    const KUBECONFIG: &str = "apiVersion: v1\nkind: Config\n";

    fn ready_substrate(name: &str) -> Substrate {
        let mut s = Substrate::new(name, SubstrateSpec::default());
        s.status = Some(SubstrateStatus {
            ready: Some(true),
            cluster: ClusterStatus {
                address: Some("10.0.12.7".to_string()),
                kube_config: Some(KUBECONFIG.to_string()),
            },
        });
        s
    }

    fn two_addon_catalog() -> CatalogConfig {
        CatalogConfig {
            addons: vec![
                AddonSpec::new("a", "ns-a", "https://charts.example/a-1.0.0.tgz"),
                AddonSpec::new("b", "ns-b", "https://charts.example/b-2.0.0.tgz")
                    .with_binding(ValueBinding::new("clusterName", ClusterField::ClusterName)),
            ],
        }
    }

    fn chart_name(location: &str) -> String {
        location
            .rsplit('/')
            .next()
            .unwrap_or(location)
            .to_string()
    }

    /// Bundle source that echoes the location as the archive
    fn echo_bundles() -> MockBundleSource {
        let mut bundles = MockBundleSource::new();
        bundles
            .expect_fetch()
            .returning(|location| Ok(location.as_bytes().to_vec()));
        bundles.expect_load().returning(|archive| {
            let name = chart_name(&String::from_utf8_lossy(&archive));
            Ok(Bundle::new(
                BundleMetadata {
                    name,
                    version: "1.0.0".to_string(),
                    app_version: None,
                },
                archive,
            ))
        });
        bundles
    }

    fn access_for(client: MockReleaseClient) -> MockClusterAccess {
        let client: Arc<dyn ReleaseClient> = Arc::new(client);
        let mut access = MockClusterAccess::new();
        access
            .expect_connect()
            .returning(move |_, _| Ok(client.clone()));
        access
    }

    fn reconciler(
        catalog: CatalogConfig,
        bundles: MockBundleSource,
        access: MockClusterAccess,
    ) -> AddonReconciler {
        AddonReconciler::new(catalog, Arc::new(bundles), Arc::new(access))
            .expect("catalog should be valid")
    }

    #[tokio::test]
    async fn not_ready_cluster_makes_no_calls() {
        // Mocks without expectations panic if called
        let r = reconciler(
            two_addon_catalog(),
            MockBundleSource::new(),
            MockClusterAccess::new(),
        );

        let mut s = ready_substrate("dev");
        s.status.as_mut().expect("status").ready = Some(false);
        assert!(matches!(r.create(&s).await, ReconcileOutcome::Retry));

        s.status = None;
        assert!(matches!(r.create(&s).await, ReconcileOutcome::Retry));
    }

    #[tokio::test]
    async fn absent_installs_and_present_upgrades() {
        let mut client = MockReleaseClient::new();
        client.expect_history().returning(|release, max| {
            assert_eq!(max, 1);
            Ok(if release == "a" {
                ReleaseHistory::Absent
            } else {
                ReleaseHistory::Present
            })
        });
        client
            .expect_install()
            .withf(|bundle, release, values, create_namespace| {
                release == "a"
                    && bundle.metadata.name == "a-1.0.0.tgz"
                    && values.is_empty()
                    && *create_namespace
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        client
            .expect_upgrade()
            .withf(|bundle, release, values| {
                release == "b"
                    && bundle.metadata.name == "b-2.0.0.tgz"
                    && values.get("clusterName") == Some(&serde_json::json!("dev"))
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let r = reconciler(two_addon_catalog(), echo_bundles(), access_for(client));
        assert!(r.create(&ready_substrate("dev")).await.is_success());
    }

    #[tokio::test]
    async fn history_error_fails_only_that_addon() {
        let mut client = MockReleaseClient::new();
        client.expect_history().returning(|release, _| {
            if release == "b" {
                Err(Error::helm("history", "Error: Kubernetes cluster unreachable"))
            } else {
                Ok(ReleaseHistory::Absent)
            }
        });
        client
            .expect_install()
            .withf(|_, release, _, _| release == "a")
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        client.expect_upgrade().never();

        let r = reconciler(two_addon_catalog(), echo_bundles(), access_for(client));
        match r.create(&ready_substrate("dev")).await {
            ReconcileOutcome::Failure(errs) => {
                assert_eq!(errs.releases(), vec!["b"]);
                let err = errs.for_release("b").expect("b failed");
                assert_eq!(err.stage, Stage::History);
                assert!(err.to_string().contains("cluster unreachable"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn every_failure_is_reported() {
        let mut bundles = MockBundleSource::new();
        bundles.expect_fetch().returning(|location| {
            if location.contains("/a-") {
                Err(Error::fetch(location, "404 Not Found"))
            } else {
                Ok(b"b".to_vec())
            }
        });
        bundles
            .expect_load()
            .returning(|_| Err(Error::validation("not a gzip archive")));

        let r = reconciler(two_addon_catalog(), bundles, MockClusterAccess::new());
        match r.create(&ready_substrate("dev")).await {
            ReconcileOutcome::Failure(errs) => {
                assert_eq!(errs.len(), 2);
                assert_eq!(errs.for_release("a").map(|e| e.stage), Some(Stage::Fetch));
                assert_eq!(errs.for_release("b").map(|e| e.stage), Some(Stage::Load));
                let msg = errs.to_string();
                assert!(msg.contains("404 Not Found"));
                assert!(msg.contains("not a gzip archive"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_failure_is_config_init_stage() {
        let mut access = MockClusterAccess::new();
        access
            .expect_connect()
            .returning(|_, _| Err(Error::internal_with_context("kubeconfig", "no clusters")));

        let r = reconciler(two_addon_catalog(), echo_bundles(), access);
        match r.create(&ready_substrate("dev")).await {
            ReconcileOutcome::Failure(errs) => {
                assert_eq!(errs.len(), 2);
                assert!(errs.iter().all(|e| e.stage == Stage::ConfigInit));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn install_and_upgrade_errors_carry_their_stage() {
        let mut client = MockReleaseClient::new();
        client.expect_history().returning(|release, _| {
            Ok(if release == "a" {
                ReleaseHistory::Absent
            } else {
                ReleaseHistory::Present
            })
        });
        client
            .expect_install()
            .returning(|_, _, _, _| Err(Error::helm("install", "values don't meet the schema")));
        client
            .expect_upgrade()
            .returning(|_, _, _| Err(Error::helm("upgrade", "another operation is in progress")));

        let r = reconciler(two_addon_catalog(), echo_bundles(), access_for(client));
        let ReconcileOutcome::Failure(errs) = r.create(&ready_substrate("dev")).await else {
            panic!("expected failure");
        };
        assert_eq!(errs.for_release("a").map(|e| e.stage), Some(Stage::Install));
        assert_eq!(errs.for_release("b").map(|e| e.stage), Some(Stage::Upgrade));
    }

    #[tokio::test]
    async fn catalog_failure_aborts_before_network() {
        let catalog = CatalogConfig {
            addons: vec![AddonSpec::new("a", "ns", "https://charts.example/a.tgz")
                .with_value("clusterName", serde_json::json!({ "nested": true }))
                .with_binding(ValueBinding::new(
                    "clusterName.nested.value",
                    ClusterField::ClusterName,
                ))],
        };
        let r = reconciler(catalog, MockBundleSource::new(), MockClusterAccess::new());

        let ReconcileOutcome::Failure(errs) = r.create(&ready_substrate("dev")).await else {
            panic!("expected failure");
        };
        assert_eq!(errs.releases(), vec!["a"]);
        assert_eq!(errs.for_release("a").map(|e| e.stage), Some(Stage::Catalog));
    }

    #[tokio::test]
    async fn teardown_is_a_noop() {
        let r = reconciler(
            two_addon_catalog(),
            MockBundleSource::new(),
            MockClusterAccess::new(),
        );
        assert!(r.delete(&ready_substrate("dev")).await.is_success());
    }

    #[test]
    fn rejects_invalid_catalog() {
        let catalog = CatalogConfig {
            addons: vec![
                AddonSpec::new("a", "ns", "https://x"),
                AddonSpec::new("a", "ns", "https://y"),
            ],
        };
        assert!(AddonReconciler::new(
            catalog,
            Arc::new(MockBundleSource::new()),
            Arc::new(MockClusterAccess::new())
        )
        .is_err());
    }
}
