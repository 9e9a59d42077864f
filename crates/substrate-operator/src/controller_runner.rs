//! Controller runner - builds the Substrate add-on controller future

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use substrate_addons::controller::{error_policy, reconcile, Context};
use substrate_common::crd::Substrate;
use substrate_common::CONTROLLER_NAME;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the Substrate add-on controller future
pub fn build_addon_controller(
    client: Client,
    ctx: Arc<Context>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let substrates: Api<Substrate> = Api::all(client);

    tracing::info!(
        controller = CONTROLLER_NAME,
        addons = ctx.reconciler.catalog().addons.len(),
        "- Substrate add-on controller"
    );

    Box::pin(
        Controller::new(
            substrates,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result(CONTROLLER_NAME)),
    )
}

/// Log the result of one reconciliation
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Display>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = %e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
