//! Shared setup for kind-based tests

use std::path::PathBuf;
use std::process::Command as ProcessCommand;
use std::sync::Arc;

use kube::Client;

use storage_e2e::cluster::{ClusterClient, KubeClusterClient};
use storage_e2e::config::RunConfig;
use storage_e2e_common::kube_utils::create_client;

/// Name of the kind cluster the tests run against
pub const KIND_CLUSTER_NAME: &str = "storage-e2e-test";

/// Environment variable pointing at the driver manifests
pub const MANIFEST_DIR_ENV: &str = "STORAGE_E2E_MANIFEST_DIR";

fn kind(args: &[&str]) -> Result<String, String> {
    let output = ProcessCommand::new("kind")
        .args(args)
        .output()
        .map_err(|e| format!("Failed to run kind: {}", e))?;
    if !output.status.success() {
        return Err(format!(
            "kind {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Ensure the kind cluster exists and return a client for it
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let clusters = kind(&["get", "clusters"])?;
    if !clusters.lines().any(|l| l.trim() == KIND_CLUSTER_NAME) {
        kind(&["create", "cluster", "--name", KIND_CLUSTER_NAME, "--wait", "120s"])?;
    }
    kind(&["export", "kubeconfig", "--name", KIND_CLUSTER_NAME])?;
    create_client(None).await.map_err(|e| e.to_string())
}

/// Manifest directory from the environment
pub fn manifest_dir() -> Result<PathBuf, String> {
    std::env::var(MANIFEST_DIR_ENV)
        .map(PathBuf::from)
        .map_err(|_| format!("{} must point at the csi-hostpath manifests", MANIFEST_DIR_ENV))
}

/// Run configuration for a kind run with short timeouts
pub fn kind_run_config() -> Result<RunConfig, String> {
    Ok(RunConfig {
        manifest_dir: manifest_dir()?,
        namespace_base: "csi-volumes-it".to_string(),
        pod_timeout: std::time::Duration::from_secs(180),
        claim_timeout: std::time::Duration::from_secs(120),
        seed: 42,
        dynamic_only: true,
        ..Default::default()
    })
}

/// Cluster client for the kind cluster
pub fn cluster_client(client: Client) -> Arc<dyn ClusterClient> {
    Arc::new(KubeClusterClient::new(client))
}
