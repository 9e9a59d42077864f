//! Kubernetes client and kubeconfig helpers

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Parse and sanity-check a kubeconfig document
///
/// A kubeconfig without any cluster entry cannot target anything, so it is
/// rejected here rather than later by whatever consumes it.
pub fn parse_kubeconfig(kubeconfig: &str) -> Result<Kubeconfig, Error> {
    let parsed = Kubeconfig::from_yaml(kubeconfig).map_err(|e| {
        Error::internal_with_context("kubeconfig", format!("failed to parse kubeconfig: {}", e))
    })?;
    require_clusters(parsed)
}

/// Read and sanity-check a kubeconfig file
pub fn read_kubeconfig(path: &Path) -> Result<Kubeconfig, Error> {
    let parsed = Kubeconfig::read_from(path).map_err(|e| {
        Error::internal_with_context(
            "kubeconfig",
            format!("failed to read kubeconfig {}: {}", path.display(), e),
        )
    })?;
    require_clusters(parsed)
}

fn require_clusters(kubeconfig: Kubeconfig) -> Result<Kubeconfig, Error> {
    if kubeconfig.clusters.is_empty() {
        return Err(Error::internal_with_context(
            "kubeconfig",
            "kubeconfig has no clusters",
        ));
    }
    Ok(kubeconfig)
}

/// Server URL of the kubeconfig's current context (or first cluster)
pub fn kubeconfig_server(kubeconfig: &Kubeconfig) -> Option<&str> {
    let cluster_name = kubeconfig
        .current_context
        .as_deref()
        .and_then(|ctx| kubeconfig.contexts.iter().find(|c| c.name == ctx))
        .and_then(|c| c.context.as_ref())
        .map(|c| c.cluster.as_str());

    let named = match cluster_name {
        Some(name) => kubeconfig.clusters.iter().find(|c| c.name == name),
        None => kubeconfig.clusters.first(),
    }?;

    named.cluster.as_ref()?.server.as_deref()
}

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
  - name: other
    cluster:
      server: https://10.0.0.1:6443
  - name: tenant
    cluster:
      server: https://10.0.12.7:8443
contexts:
  - name: tenant-admin
    context:
      cluster: tenant
      user: admin
current-context: tenant-admin
users:
  - name: admin
    user:
      token: abc
"#;

    #[test]
    fn parses_valid_kubeconfig() {
        let kc = parse_kubeconfig(KUBECONFIG).expect("should parse");
        assert_eq!(kc.clusters.len(), 2);
    }

    #[test]
    fn server_follows_current_context() {
        let kc = parse_kubeconfig(KUBECONFIG).expect("should parse");
        assert_eq!(kubeconfig_server(&kc), Some("https://10.0.12.7:8443"));
    }

    #[test]
    fn server_falls_back_to_first_cluster() {
        let mut kc = parse_kubeconfig(KUBECONFIG).expect("should parse");
        kc.current_context = None;
        assert_eq!(kubeconfig_server(&kc), Some("https://10.0.0.1:6443"));
    }

    #[test]
    fn rejects_kubeconfig_without_clusters() {
        let err = parse_kubeconfig("apiVersion: v1\nkind: Config\nclusters: []\n")
            .expect_err("no clusters");
        assert!(err.to_string().contains("no clusters"));
    }

    #[test]
    fn reads_kubeconfig_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("admin.kubeconfig");
        std::fs::write(&path, KUBECONFIG).expect("write kubeconfig");

        let kc = read_kubeconfig(&path).expect("should read");
        assert_eq!(kubeconfig_server(&kc), Some("https://10.0.12.7:8443"));
        assert!(read_kubeconfig(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_kubeconfig("clusters: [[[").is_err());
    }
}
