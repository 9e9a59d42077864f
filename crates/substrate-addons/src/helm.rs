//! Thin async wrapper around the `helm` binary
//!
//! Helm writes a lot of debug chatter to stderr. It is discarded unless
//! `debug` is enabled, in which case it is forwarded at trace level.
//! Child processes are killed when the calling future is dropped.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::trace;

use substrate_common::Error;

/// Default helm binary, resolved through `PATH`
pub const DEFAULT_HELM_BIN: &str = "helm";

/// Helm CLI configuration
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: PathBuf,
    debug: bool,
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new(DEFAULT_HELM_BIN)
    }
}

/// Captured output of a helm invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmOutput {
    /// Whether helm exited successfully
    pub success: bool,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl HelmOutput {
    /// Error describing a failed invocation of `command`
    pub fn into_error(self, command: &str) -> Error {
        let stderr = self.stderr.trim();
        let message = stderr
            .lines()
            .rev()
            .find(|l| l.starts_with("Error:"))
            .unwrap_or(stderr);
        Error::helm(command, message)
    }
}

impl HelmCli {
    /// Use the given helm binary
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            debug: false,
        }
    }

    /// Forward helm's debug output to trace logs
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Path of the helm binary
    pub fn binary(&self) -> &std::path::Path {
        &self.binary
    }

    /// Run helm and capture its output, without interpreting the exit status
    pub async fn run(&self, args: Vec<OsString>) -> Result<HelmOutput, Error> {
        let command = args
            .first()
            .map(|a| a.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.debug {
            cmd.arg("--debug");
        }

        let output = cmd.output().await.map_err(|e| {
            Error::helm(
                &command,
                format!("failed to run {}: {}", self.binary.display(), e),
            )
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if self.debug {
            for line in stderr.lines() {
                trace!(command = %command, "{}", line);
            }
        }

        Ok(HelmOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    /// Run helm and fail on a non-zero exit status
    pub async fn run_checked(&self, args: Vec<OsString>) -> Result<String, Error> {
        let command = args
            .first()
            .map(|a| a.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = self.run(args).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(output.into_error(&command))
        }
    }
}

/// Build an argument vector from string-like parts
pub(crate) fn args<I, S>(parts: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    parts.into_iter().map(Into::into).collect()
}
