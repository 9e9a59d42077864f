//! Bundle retrieval and loading
//!
//! A bundle is a packaged chart archive. Remote locations are fetched over
//! HTTP(S); `file://` and absolute paths read from a local chart directory
//! so air-gapped installs can ship charts alongside the operator.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tracing::debug;

use substrate_common::Error;

use crate::helm::{args, HelmCli};

/// Timeout for a single bundle download
const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Chart metadata read from a bundle
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    /// Chart name
    pub name: String,
    /// Chart version
    pub version: String,
    /// Version of the packaged application
    #[serde(default)]
    pub app_version: Option<String>,
}

/// A loaded bundle, ready to be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Chart metadata
    pub metadata: BundleMetadata,
    archive: Arc<[u8]>,
}

impl Bundle {
    /// Create a bundle from its metadata and raw archive bytes
    pub fn new(metadata: BundleMetadata, archive: impl Into<Arc<[u8]>>) -> Self {
        Self {
            metadata,
            archive: archive.into(),
        }
    }

    /// Raw archive bytes
    pub fn archive(&self) -> &[u8] {
        &self.archive
    }

    /// Write the archive to a temporary `.tgz` file
    ///
    /// The file is removed when the returned handle is dropped.
    pub fn materialize(&self) -> Result<tempfile::NamedTempFile, Error> {
        write_archive(&self.archive)
    }
}

/// Retrieval and parsing of bundles
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BundleSource: Send + Sync {
    /// Retrieve the raw archive at `location`
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, Error>;

    /// Parse a raw archive into a bundle
    async fn load(&self, archive: Vec<u8>) -> Result<Bundle, Error>;
}

/// Where a location string points
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location<'a> {
    Remote(&'a str),
    Local(&'a Path),
}

fn classify(location: &str) -> Result<Location<'_>, Error> {
    if location.starts_with("https://") || location.starts_with("http://") {
        return Ok(Location::Remote(location));
    }
    if let Some(path) = location.strip_prefix("file://") {
        return Ok(Location::Local(Path::new(path)));
    }
    let path = Path::new(location);
    if path.is_absolute() {
        return Ok(Location::Local(path));
    }
    Err(Error::fetch(location, "unsupported location scheme"))
}

/// Production bundle source: HTTP(S) and local files, inspected with helm
#[derive(Debug, Clone)]
pub struct HttpBundleSource {
    http: reqwest::Client,
    helm: HelmCli,
}

impl HttpBundleSource {
    /// Create a bundle source using the given helm CLI for inspection
    pub fn new(helm: HelmCli) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::internal_with_context("bundle", format!("failed to build http client: {}", e))
            })?;
        Ok(Self { http, helm })
    }
}

#[async_trait]
impl BundleSource for HttpBundleSource {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, Error> {
        match classify(location)? {
            Location::Remote(url) => {
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| Error::fetch(location, e.to_string()))?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| Error::fetch(location, e.to_string()))?;
                debug!(location, size = bytes.len(), "fetched bundle");
                Ok(bytes.to_vec())
            }
            Location::Local(path) => tokio::fs::read(path)
                .await
                .map_err(|e| Error::fetch(location, e.to_string())),
        }
    }

    async fn load(&self, archive: Vec<u8>) -> Result<Bundle, Error> {
        if archive.is_empty() {
            return Err(Error::validation("bundle archive is empty"));
        }

        let file = write_archive(&archive)?;
        let chart_yaml = self
            .helm
            .run_checked(args([
                "show".into(),
                "chart".into(),
                file.path().as_os_str().to_owned(),
            ]))
            .await?;

        let metadata = parse_metadata(&chart_yaml)?;
        debug!(chart = %metadata.name, version = %metadata.version, "loaded bundle");
        Ok(Bundle::new(metadata, archive))
    }
}

fn parse_metadata(chart_yaml: &str) -> Result<BundleMetadata, Error> {
    serde_yaml::from_str(chart_yaml)
        .map_err(|e| Error::serialization_for("Chart", format!("invalid chart metadata: {}", e)))
}

fn write_archive(archive: &[u8]) -> Result<tempfile::NamedTempFile, Error> {
    let mut file = tempfile::Builder::new()
        .prefix("bundle-")
        .suffix(".tgz")
        .tempfile()
        .map_err(|e| Error::internal_with_context("tempfile", e.to_string()))?;
    file.write_all(archive)
        .and_then(|_| file.flush())
        .map_err(|e| Error::internal_with_context("tempfile", e.to_string()))?;
    Ok(file)
}
