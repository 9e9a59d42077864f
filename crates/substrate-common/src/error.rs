//! Error types for substrate add-on provisioning
//!
//! Errors are structured with fields to aid debugging in production.
//! Per-add-on failures carry the release name and the stage that failed,
//! and are collected into [`AddonErrors`] so a single pass can report every
//! failing add-on instead of only the first one.

use std::fmt;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for substrate operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for configuration or resource contents
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "addons[2].releaseName")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being serialized (if known)
        kind: Option<String>,
    },

    /// Bundle retrieval error
    #[error("fetch error for {location}: {message}")]
    Fetch {
        /// Location that could not be retrieved
        location: String,
        /// Description of what failed
        message: String,
    },

    /// Helm invocation error
    #[error("helm {command} failed: {message}")]
    Helm {
        /// Helm subcommand that failed (install, upgrade, history, show)
        command: String,
        /// Description of what failed, usually helm's stderr
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "kubeconfig", "tempfile")
        context: String,
    },

    /// One or more add-ons failed during a reconciliation pass
    #[error(transparent)]
    Addons(#[from] AddonErrors),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with a field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific document kind
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a fetch error for a bundle location
    pub fn fetch(location: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            location: location.into(),
            message: msg.into(),
        }
    }

    /// Create a helm error for the given subcommand
    pub fn helm(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Helm {
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }
}

/// Stage of a single add-on operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Computing the add-on descriptor from cluster state
    Catalog,
    /// Retrieving the bundle archive
    Fetch,
    /// Parsing the bundle archive
    Load,
    /// Establishing a release handle for the target cluster/namespace
    ConfigInit,
    /// Querying release history
    History,
    /// First-time install
    Install,
    /// Upgrade of an existing release
    Upgrade,
}

impl Stage {
    /// Stable short name, used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Catalog => "catalog",
            Stage::Fetch => "fetch",
            Stage::Load => "load",
            Stage::ConfigInit => "config-init",
            Stage::History => "history",
            Stage::Install => "install",
            Stage::Upgrade => "upgrade",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Stage::Catalog => "building descriptor",
            Stage::Fetch => "getting chart",
            Stage::Load => "loading chart archive",
            Stage::ConfigInit => "init release config",
            Stage::History => "looking up release history",
            Stage::Install => "installing chart",
            Stage::Upgrade => "upgrading chart",
        };
        f.write_str(description)
    }
}

/// Failure of a single add-on, tagged with the release and stage
#[derive(Debug, Error)]
#[error("{release}: {stage}: {source}")]
pub struct AddonError {
    /// Release name of the failing add-on
    pub release: String,
    /// Stage that failed
    pub stage: Stage,
    /// Underlying cause
    #[source]
    pub source: Error,
}

impl AddonError {
    /// Create an add-on error
    pub fn new(release: impl Into<String>, stage: Stage, source: Error) -> Self {
        Self {
            release: release.into(),
            stage,
            source,
        }
    }
}

/// Composite of zero or more add-on failures from one pass
///
/// Keeps every failure in catalog order so callers can inspect them
/// individually rather than parsing a concatenated message.
#[derive(Debug, Default)]
pub struct AddonErrors(Vec<AddonError>);

impl AddonErrors {
    /// Combine per-add-on results, keeping every failure
    ///
    /// Returns `None` when every result succeeded.
    pub fn combine<T>(results: impl IntoIterator<Item = Result<T, AddonError>>) -> Option<Self> {
        let failures: Vec<AddonError> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            None
        } else {
            Some(Self(failures))
        }
    }

    /// True if no add-on failed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of failed add-ons
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate the constituent failures
    pub fn iter(&self) -> std::slice::Iter<'_, AddonError> {
        self.0.iter()
    }

    /// Release names of the failed add-ons, in catalog order
    pub fn releases(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.release.as_str()).collect()
    }

    /// Failure for a specific release, if it failed
    pub fn for_release(&self, release: &str) -> Option<&AddonError> {
        self.0.iter().find(|e| e.release == release)
    }

    /// Consume into the constituent failures
    pub fn into_inner(self) -> Vec<AddonError> {
        self.0
    }
}

impl From<AddonError> for AddonErrors {
    fn from(err: AddonError) -> Self {
        Self(vec![err])
    }
}

impl FromIterator<AddonError> for AddonErrors {
    fn from_iter<I: IntoIterator<Item = AddonError>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for AddonErrors {
    type Item = AddonError;
    type IntoIter = std::vec::IntoIter<AddonError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a AddonErrors {
    type Item = &'a AddonError;
    type IntoIter = std::slice::Iter<'a, AddonError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for AddonErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} add-on(s) failed", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AddonErrors {}
