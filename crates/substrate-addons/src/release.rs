//! Release history and apply operations against a tenant cluster
//!
//! [`ClusterAccess`] turns a tenant credential into a [`ReleaseClient`]
//! scoped to one namespace. The production implementation drives the
//! `helm` binary. The credential is either the path of a kubeconfig file,
//! used in place, or inline kubeconfig YAML, materialised into a private
//! temp file.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tempfile::NamedTempFile;
use tracing::debug;

use substrate_common::kube_utils::{kubeconfig_server, parse_kubeconfig, read_kubeconfig};
use substrate_common::Error;

use crate::bundle::Bundle;
use crate::catalog::Values;
use crate::helm::{args, HelmCli};

/// helm's message when a release has never been installed
const RELEASE_NOT_FOUND: &str = "release: not found";

/// Existence of a release on the target cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseHistory {
    /// No revision has ever been recorded
    Absent,
    /// At least one revision exists
    Present,
}

/// Release operations scoped to one cluster and namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseClient: Send + Sync {
    /// Read-only probe of the release's history, limited to `max` revisions
    async fn history(&self, release: &str, max: u32) -> Result<ReleaseHistory, Error>;

    /// First-time install of `bundle` as `release`
    async fn install(
        &self,
        bundle: &Bundle,
        release: &str,
        values: &Values,
        create_namespace: bool,
    ) -> Result<(), Error>;

    /// Upgrade the existing `release` to `bundle`
    async fn upgrade(&self, bundle: &Bundle, release: &str, values: &Values) -> Result<(), Error>;
}

/// Builds release clients from a tenant credential
#[cfg_attr(test, automock)]
pub trait ClusterAccess: Send + Sync {
    /// Create a release client for `namespace` on the cluster described by `kubeconfig`
    fn connect(&self, kubeconfig: &str, namespace: &str) -> Result<Arc<dyn ReleaseClient>, Error>;
}

/// [`ClusterAccess`] backed by the helm CLI
#[derive(Debug, Clone, Default)]
pub struct HelmClusterAccess {
    helm: HelmCli,
}

impl HelmClusterAccess {
    /// Create with the given helm CLI
    pub fn new(helm: HelmCli) -> Self {
        Self { helm }
    }
}

impl ClusterAccess for HelmClusterAccess {
    fn connect(&self, kubeconfig: &str, namespace: &str) -> Result<Arc<dyn ReleaseClient>, Error> {
        let kubeconfig = KubeconfigFile::resolve(kubeconfig)?;
        Ok(Arc::new(HelmReleaseClient {
            helm: self.helm.clone(),
            kubeconfig,
            namespace: namespace.to_string(),
        }))
    }
}

/// Kubeconfig handed to helm via `--kubeconfig`
#[derive(Debug)]
enum KubeconfigFile {
    /// Existing file named by the cluster status
    Path(PathBuf),
    /// Inline YAML written to a private temp file
    Temp(NamedTempFile),
}

impl KubeconfigFile {
    /// Validate a tenant credential and make it available as a file
    ///
    /// A value naming an existing file is used in place; anything else is
    /// treated as inline kubeconfig YAML.
    fn resolve(kubeconfig: &str) -> Result<Self, Error> {
        let path = Path::new(kubeconfig.trim());
        if path.is_file() {
            let parsed = read_kubeconfig(path)?;
            debug!(
                server = kubeconfig_server(&parsed).unwrap_or("unknown"),
                path = %path.display(),
                "using kubeconfig file"
            );
            return Ok(Self::Path(path.to_path_buf()));
        }

        let parsed = parse_kubeconfig(kubeconfig)?;
        debug!(
            server = kubeconfig_server(&parsed).unwrap_or("unknown"),
            "using inline kubeconfig"
        );

        let mut file = tempfile::Builder::new()
            .prefix("kubeconfig-")
            .tempfile()
            .map_err(|e| Error::internal_with_context("kubeconfig", e.to_string()))?;
        file.write_all(kubeconfig.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| Error::internal_with_context("kubeconfig", e.to_string()))?;
        Ok(Self::Temp(file))
    }

    fn path(&self) -> &Path {
        match self {
            Self::Path(path) => path.as_path(),
            Self::Temp(file) => file.path(),
        }
    }
}

/// [`ReleaseClient`] that shells out to helm
#[derive(Debug)]
pub struct HelmReleaseClient {
    helm: HelmCli,
    kubeconfig: KubeconfigFile,
    namespace: String,
}

impl HelmReleaseClient {
    fn scoped(&self, mut argv: Vec<OsString>) -> Vec<OsString> {
        argv.extend(args([
            OsString::from("--namespace"),
            OsString::from(&self.namespace),
            OsString::from("--kubeconfig"),
            self.kubeconfig.path().as_os_str().to_owned(),
        ]));
        argv
    }
}

#[async_trait]
impl ReleaseClient for HelmReleaseClient {
    async fn history(&self, release: &str, max: u32) -> Result<ReleaseHistory, Error> {
        let argv = self.scoped(args([
            "history".to_string(),
            release.to_string(),
            "--max".to_string(),
            max.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ]));
        let output = self.helm.run(argv).await?;

        if !output.success {
            if output.stderr.contains(RELEASE_NOT_FOUND) {
                return Ok(ReleaseHistory::Absent);
            }
            return Err(output.into_error("history"));
        }
        parse_history(&output.stdout)
    }

    async fn install(
        &self,
        bundle: &Bundle,
        release: &str,
        values: &Values,
        create_namespace: bool,
    ) -> Result<(), Error> {
        let chart = bundle.materialize()?;
        let values_file = write_values(values)?;

        let mut argv = args([
            OsString::from("install"),
            OsString::from(release),
            chart.path().as_os_str().to_owned(),
            OsString::from("--values"),
            values_file.path().as_os_str().to_owned(),
        ]);
        if create_namespace {
            argv.push("--create-namespace".into());
        }

        self.helm.run_checked(self.scoped(argv)).await?;
        Ok(())
    }

    async fn upgrade(&self, bundle: &Bundle, release: &str, values: &Values) -> Result<(), Error> {
        let chart = bundle.materialize()?;
        let values_file = write_values(values)?;

        let argv = args([
            OsString::from("upgrade"),
            OsString::from(release),
            chart.path().as_os_str().to_owned(),
            OsString::from("--values"),
            values_file.path().as_os_str().to_owned(),
        ]);

        self.helm.run_checked(self.scoped(argv)).await?;
        Ok(())
    }
}

/// Interpret `helm history -o json` output
fn parse_history(stdout: &str) -> Result<ReleaseHistory, Error> {
    let revisions: Vec<serde_json::Value> = serde_json::from_str(stdout.trim())
        .map_err(|e| Error::serialization_for("ReleaseHistory", e.to_string()))?;
    Ok(if revisions.is_empty() {
        ReleaseHistory::Absent
    } else {
        ReleaseHistory::Present
    })
}

fn write_values(values: &Values) -> Result<NamedTempFile, Error> {
    let yaml = serde_yaml::to_string(values)
        .map_err(|e| Error::serialization_for("Values", e.to_string()))?;
    let mut file = tempfile::Builder::new()
        .prefix("values-")
        .suffix(".yaml")
        .tempfile()
        .map_err(|e| Error::internal_with_context("tempfile", e.to_string()))?;
    file.write_all(yaml.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| Error::internal_with_context("tempfile", e.to_string()))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
  - name: tenant
    cluster:
      server: https://10.0.12.7:8443
contexts:
  - name: admin
    context:
      cluster: tenant
      user: admin
current-context: admin
users:
  - name: admin
    user:
      token: abc
"#;

    #[test]
    fn history_with_revisions_is_present() {
        let stdout = r#"[{"revision":3,"updated":"2022-01-01","status":"deployed","chart":"karpenter-0.5.5","app_version":"0.5.5","description":"Upgrade complete"}]"#;
        assert_eq!(parse_history(stdout).expect("parse"), ReleaseHistory::Present);
    }

    #[test]
    fn empty_history_is_absent() {
        assert_eq!(parse_history("[]\n").expect("parse"), ReleaseHistory::Absent);
    }

    #[test]
    fn garbage_history_is_an_error() {
        assert!(parse_history("Error: something").is_err());
    }

    #[test]
    fn values_are_written_as_yaml() {
        let values = serde_json::json!({ "controller": { "replicaCount": "1" } });
        let serde_json::Value::Object(values) = values else {
            unreachable!()
        };
        let file = write_values(&values).expect("write");
        let written = std::fs::read_to_string(file.path()).expect("read back");
        let parsed: serde_json::Value = serde_yaml::from_str(&written).expect("yaml");
        assert_eq!(parsed["controller"]["replicaCount"], "1");
    }

    #[test]
    fn connect_rejects_invalid_kubeconfig() {
        let access = HelmClusterAccess::default();
        assert!(access.connect("not: [a kubeconfig", "kube-system").is_err());
        assert!(access.connect("", "kube-system").is_err());
    }

    #[test]
    fn connect_scopes_commands_to_namespace() {
        let access = HelmClusterAccess::default();
        assert!(access.connect(KUBECONFIG, "karpenter").is_ok());

        let client = HelmReleaseClient {
            helm: HelmCli::default(),
            kubeconfig: KubeconfigFile::Temp(tempfile::NamedTempFile::new().expect("tempfile")),
            namespace: "karpenter".to_string(),
        };
        let argv = client.scoped(args(["history", "karpenter"]));
        let argv: Vec<String> = argv
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(&argv[..4], &["history", "karpenter", "--namespace", "karpenter"]);
        assert_eq!(argv[4], "--kubeconfig");
        assert_eq!(argv[5], client.kubeconfig.path().to_string_lossy());
    }

    #[test]
    fn inline_kubeconfig_is_written_to_a_private_file() {
        let resolved = KubeconfigFile::resolve(KUBECONFIG).expect("inline kubeconfig");
        assert!(matches!(resolved, KubeconfigFile::Temp(_)));
        assert_eq!(
            std::fs::read_to_string(resolved.path()).expect("read back"),
            KUBECONFIG
        );
    }

    #[test]
    fn kubeconfig_path_is_used_in_place() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(KUBECONFIG.as_bytes()).expect("write kubeconfig");
        let location = file.path().to_string_lossy().into_owned();

        let resolved = KubeconfigFile::resolve(&location).expect("kubeconfig path");
        assert!(matches!(resolved, KubeconfigFile::Path(_)));
        assert_eq!(resolved.path(), file.path());

        assert!(HelmClusterAccess::default().connect(&location, "kit").is_ok());
    }

    #[test]
    fn kubeconfig_path_with_invalid_contents_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(b"apiVersion: v1\nkind: Config\nclusters: []\n").expect("write kubeconfig");
        let location = file.path().to_string_lossy().into_owned();

        let err = HelmClusterAccess::default()
            .connect(&location, "kit")
            .err()
            .expect("no clusters");
        assert!(err.to_string().contains("no clusters"));
    }

    #[tokio::test]
    async fn history_reports_missing_helm() {
        let access = HelmClusterAccess::new(HelmCli::new("/nonexistent/helm"));
        let client = access.connect(KUBECONFIG, "kit").expect("connect");
        let err = client.history("kit-operator", 1).await.expect_err("no helm");
        assert!(matches!(err, Error::Helm { .. }));
    }
}
