//! Shared Kubernetes utilities using kube-rs
//!
//! Manifest metadata extraction, API resource construction for untyped
//! documents, node readiness checks and bounded waits.

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Node;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde_json::Value;
use tracing::trace;

use crate::Error;

/// The "Ready" condition type for nodes
pub const CONDITION_READY: &str = "Ready";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Taint effects that keep test pods off a node
const BLOCKING_TAINT_EFFECTS: &[&str] = &["NoSchedule", "NoExecute"];

/// Identity of a manifest document, extracted before it is applied
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestMetadata {
    /// Full apiVersion (e.g. "apps/v1")
    pub api_version: String,
    /// Resource kind
    pub kind: String,
    /// Resource name
    pub name: String,
    /// Namespace, if the document carries one
    pub namespace: Option<String>,
}

impl ManifestMetadata {
    /// Extract identity fields from a parsed document
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let field = |pointer: &str| value.pointer(pointer).and_then(|v| v.as_str());

        let api_version = field("/apiVersion").ok_or_else(|| {
            Error::internal_with_context("manifest_metadata", "manifest missing apiVersion")
        })?;
        let kind = field("/kind").ok_or_else(|| {
            Error::internal_with_context("manifest_metadata", "manifest missing kind")
        })?;
        let name = field("/metadata/name").ok_or_else(|| {
            Error::internal_with_context(
                "manifest_metadata",
                format!("{} manifest missing metadata.name", kind),
            )
        })?;

        Ok(Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: field("/metadata/namespace").map(str::to_string),
        })
    }

    /// Build the API resource used to address this document
    pub fn api_resource(&self) -> ApiResource {
        build_api_resource(&self.api_version, &self.kind)
    }
}

impl std::fmt::Display for ManifestMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} in {}", self.kind, self.name, ns),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use storage_e2e_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("storage.k8s.io/v1");
/// assert_eq!(group, "storage.k8s.io");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from an apiVersion and kind without discovery.
///
/// Used as a fallback when discovery does not know the kind yet.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Whether a node is Ready, not cordoned and free of blocking taints
pub fn is_node_ready_and_schedulable(node: &Node) -> bool {
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == CONDITION_READY && c.status == STATUS_TRUE)
        });
    if !ready {
        return false;
    }

    let Some(spec) = node.spec.as_ref() else {
        return true;
    };
    if spec.unschedulable.unwrap_or(false) {
        return false;
    }
    !spec.taints.iter().flatten().any(|taint| {
        BLOCKING_TAINT_EFFECTS.contains(&taint.effect.as_str())
    })
}

/// Whether a kube-rs error is an API "not found" response
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Poll until a condition is met or timeout is reached
///
/// `check_fn` returns `Ok(true)` when the condition holds and `Ok(false)` to
/// keep waiting. A check error ends the wait immediately; nothing is retried.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = Instant::now();
    let timeout_msg = timeout_msg.into();

    loop {
        if check_fn().await? {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(Error::timeout("poll_until", timeout_msg));
        }
        trace!("condition not yet met, waiting");
        tokio::time::sleep(poll_interval).await;
    }
}

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path
///
/// Without a path the config is inferred (in-cluster, then `KUBECONFIG`).
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
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
