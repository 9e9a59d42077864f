//! Substrate add-on controller
//!
//! Maps the outcome of an add-on pass onto kube-rs controller actions:
//! success waits for the next change, a cluster that is not ready yet is
//! requeued, and failures are returned as errors so [`error_policy`]
//! applies the error backoff.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info, instrument};

use substrate_common::crd::Substrate;
use substrate_common::Error;

use crate::bundle::{BundleSource, HttpBundleSource};
use crate::catalog::CatalogConfig;
use crate::helm::HelmCli;
use crate::reconciler::{AddonReconciler, ReconcileOutcome};
use crate::release::{ClusterAccess, HelmClusterAccess};

/// Requeue interval while the cluster is not ready
pub const DEFAULT_NOT_READY_REQUEUE: Duration = Duration::from_secs(10);

/// Requeue interval after a failed pass
pub const DEFAULT_ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Shared context for the add-on controller
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(CatalogConfig::default())
///     .helm(HelmCli::new("/usr/local/bin/helm"))
///     .build()?;
/// ```
pub struct Context {
    /// Add-on reconciler
    pub reconciler: AddonReconciler,
    /// Requeue interval while the cluster is not ready
    pub not_ready_requeue: Duration,
    /// Requeue interval after a failed pass
    pub error_requeue: Duration,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(catalog: CatalogConfig) -> ContextBuilder {
        ContextBuilder::new(catalog)
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    catalog: CatalogConfig,
    helm: HelmCli,
    bundles: Option<Arc<dyn BundleSource>>,
    access: Option<Arc<dyn ClusterAccess>>,
    not_ready_requeue: Duration,
    error_requeue: Duration,
}

impl ContextBuilder {
    fn new(catalog: CatalogConfig) -> Self {
        Self {
            catalog,
            helm: HelmCli::default(),
            bundles: None,
            access: None,
            not_ready_requeue: DEFAULT_NOT_READY_REQUEUE,
            error_requeue: DEFAULT_ERROR_REQUEUE,
        }
    }

    /// Helm CLI used by the default bundle source and cluster access
    pub fn helm(mut self, helm: HelmCli) -> Self {
        self.helm = helm;
        self
    }

    /// Override the bundle source (primarily for testing)
    pub fn bundle_source(mut self, bundles: Arc<dyn BundleSource>) -> Self {
        self.bundles = Some(bundles);
        self
    }

    /// Override the cluster access (primarily for testing)
    pub fn cluster_access(mut self, access: Arc<dyn ClusterAccess>) -> Self {
        self.access = Some(access);
        self
    }

    /// Requeue interval while the cluster is not ready
    pub fn not_ready_requeue(mut self, interval: Duration) -> Self {
        self.not_ready_requeue = interval;
        self
    }

    /// Requeue interval after a failed pass
    pub fn error_requeue(mut self, interval: Duration) -> Self {
        self.error_requeue = interval;
        self
    }

    /// Build the Context
    pub fn build(self) -> Result<Context, Error> {
        let bundles = match self.bundles {
            Some(bundles) => bundles,
            None => Arc::new(HttpBundleSource::new(self.helm.clone())?),
        };
        let access = self
            .access
            .unwrap_or_else(|| Arc::new(HelmClusterAccess::new(self.helm.clone())));

        Ok(Context {
            reconciler: AddonReconciler::new(self.catalog, bundles, access)?,
            not_ready_requeue: self.not_ready_requeue,
            error_requeue: self.error_requeue,
        })
    }
}

/// Reconcile the add-ons of a Substrate
#[instrument(skip(substrate, ctx), fields(cluster = %substrate.name_any()))]
pub async fn reconcile(substrate: Arc<Substrate>, ctx: Arc<Context>) -> Result<Action, Error> {
    let outcome = if substrate.metadata.deletion_timestamp.is_some() {
        ctx.reconciler.delete(&*substrate).await
    } else {
        ctx.reconciler.create(&*substrate).await
    };

    match outcome {
        ReconcileOutcome::Success => Ok(Action::await_change()),
        ReconcileOutcome::Retry => {
            info!("substrate not ready, requeueing");
            Ok(Action::requeue(ctx.not_ready_requeue))
        }
        ReconcileOutcome::Failure(errs) => Err(Error::Addons(errs)),
    }
}

/// Error policy for the add-on controller
pub fn error_policy(substrate: Arc<Substrate>, error: &Error, ctx: Arc<Context>) -> Action {
    match error {
        Error::Addons(errs) => error!(
            cluster = %substrate.name_any(),
            failed = ?errs.releases(),
            %error,
            "add-on reconciliation failed"
        ),
        _ => error!(
            cluster = %substrate.name_any(),
            ?error,
            "add-on reconciliation failed"
        ),
    }
    Action::requeue(ctx.error_requeue)
}
