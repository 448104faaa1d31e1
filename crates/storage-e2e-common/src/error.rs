//! Error types for storage e2e runs
//!
//! Errors are structured with fields to aid debugging when a run fails in CI.
//! Each variant carries the driver, suite, manifest or object it concerns so
//! the run report can attribute the failure without re-reading logs.
//!
//! A skipped scenario is not an error and never flows through this type.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for storage e2e operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A manifest could not be loaded or parsed
    #[error("manifest error [{path}]: {message}")]
    Manifest {
        /// Path of the manifest, relative to the manifest root
        path: String,
        /// Description of what failed
        message: String,
    },

    /// A manifest document could not be patched
    #[error("patch error for {kind}/{name}: {message}")]
    Patch {
        /// Kind of the document being patched
        kind: String,
        /// Name of the document being patched
        name: String,
        /// Description of what failed
        message: String,
    },

    /// Installing a driver's control plane failed
    #[error("deploy error for driver {driver}: {message}")]
    Deploy {
        /// Driver being installed
        driver: String,
        /// Description of what failed
        message: String,
    },

    /// Per-scenario resource setup failed
    #[error("setup error for driver {driver} [{pattern}]: {message}")]
    Setup {
        /// Driver the resource was requested from
        driver: String,
        /// Pattern being set up
        pattern: String,
        /// Description of what failed
        message: String,
    },

    /// A driver declares something it cannot service
    #[error("configuration error for driver {driver}: {message}")]
    Configuration {
        /// Driver with the inconsistent declaration
        driver: String,
        /// Description of the inconsistency
        message: String,
    },

    /// A suite assertion failed
    #[error("execution error in suite {suite}: {message}")]
    Execution {
        /// Suite whose assertion failed
        suite: String,
        /// Description of what failed
        message: String,
    },

    /// A wait on cluster-side state did not complete in time
    #[error("timeout [{context}]: {message}")]
    Timeout {
        /// What was being waited on
        context: String,
        /// Description of the wait
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a manifest error for the given path
    pub fn manifest(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a patch error for a document
    pub fn patch(kind: impl Into<String>, name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Patch {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a deploy error for a driver
    pub fn deploy(driver: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Deploy {
            driver: driver.into(),
            message: msg.into(),
        }
    }

    /// Create a setup error for a driver and pattern
    pub fn setup(
        driver: impl Into<String>,
        pattern: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Setup {
            driver: driver.into(),
            pattern: pattern.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error for a driver
    pub fn configuration(driver: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            driver: driver.into(),
            message: msg.into(),
        }
    }

    /// Create an execution error for a suite
    pub fn execution(suite: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Execution {
            suite: suite.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error with context
    pub fn timeout(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Timeout {
            context: context.into(),
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

    /// Check whether this error aborts a whole driver run rather than one scenario
    ///
    /// Deploy failures leave a half-installed driver behind; nothing it reports
    /// afterwards can be trusted.
    pub fn is_driver_fatal(&self) -> bool {
        matches!(self, Error::Deploy { .. } | Error::Patch { .. })
    }

    /// Check whether this is a Kubernetes "not found" response
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }
}
