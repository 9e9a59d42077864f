//! Substrate Operator - provisions add-ons onto tenant clusters

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::CustomResourceExt;

use substrate_addons::catalog::CatalogConfig;
use substrate_addons::controller::{
    Context, DEFAULT_ERROR_REQUEUE, DEFAULT_NOT_READY_REQUEUE,
};
use substrate_addons::helm::{HelmCli, DEFAULT_HELM_BIN};
use substrate_common::crd::Substrate;
use substrate_common::kube_utils::create_client;
use substrate_common::telemetry::{init_telemetry, TelemetryConfig};

mod controller_runner;

/// Substrate - installs and upgrades the add-on catalog on every ready tenant cluster
#[derive(Parser, Debug)]
#[command(name = "substrate-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Add-on catalog file (YAML); the built-in catalog is used when unset
    #[arg(long, env = "SUBSTRATE_ADDON_CATALOG")]
    catalog: Option<PathBuf>,

    /// helm binary used to inspect and apply bundles
    #[arg(long, env = "HELM_BIN", default_value = DEFAULT_HELM_BIN)]
    helm_bin: PathBuf,

    /// Forward helm's debug output to trace logs
    #[arg(long)]
    helm_debug: bool,

    /// Seconds to wait before rechecking a cluster that is not ready
    #[arg(long, default_value_t = DEFAULT_NOT_READY_REQUEUE.as_secs())]
    not_ready_requeue_secs: u64,

    /// Seconds to wait before retrying after add-on failures
    #[arg(long, default_value_t = DEFAULT_ERROR_REQUEUE.as_secs())]
    error_requeue_secs: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches Substrate objects and, once a tenant cluster reports ready,
    /// installs or upgrades every add-on in the catalog.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Substrate::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli).await,
    }
}

/// Load the add-on catalog from `path`, or the built-in catalog
fn load_catalog(path: Option<&std::path::Path>) -> anyhow::Result<CatalogConfig> {
    match path {
        Some(path) => {
            let catalog = CatalogConfig::from_file(path)
                .map_err(|e| anyhow::anyhow!("Failed to load catalog: {}", e))?;
            tracing::info!(path = %path.display(), addons = catalog.addons.len(), "loaded add-on catalog");
            Ok(catalog)
        }
        None => Ok(CatalogConfig::default()),
    }
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("Substrate controller starting...");

    let catalog = load_catalog(cli.catalog.as_deref())?;
    let helm = HelmCli::new(&cli.helm_bin).with_debug(cli.helm_debug);

    let ctx = Context::builder(catalog)
        .helm(helm)
        .not_ready_requeue(Duration::from_secs(cli.not_ready_requeue_secs))
        .error_requeue(Duration::from_secs(cli.error_requeue_secs))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build controller context: {}", e))?;

    let client = create_client(None)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    tracing::info!("Starting Substrate controller...");
    controller_runner::build_addon_controller(client, Arc::new(ctx)).await;

    tracing::info!("Substrate controller shutting down");
    Ok(())
}
