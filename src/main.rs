//! storage-e2e - run the storage driver test matrix against a cluster

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info};

use storage_e2e::cluster::{ClusterClient, KubeClusterClient};
use storage_e2e::config::{
    RunConfig, DEFAULT_BUSYBOX_IMAGE, DEFAULT_CLAIM_SIZE, DEFAULT_NAMESPACE_BASE,
};
use storage_e2e::driver::{CsiHostpathDriver, DriverFactory, TestDriver};
use storage_e2e::matrix::MatrixRunner;
use storage_e2e::suite::builtin_suites;
use storage_e2e_common::kube_utils::create_client;
use storage_e2e_common::telemetry::{init_logging, LogFormat};

/// Log output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogOutput {
    Text,
    Json,
}

impl From<LogOutput> for LogFormat {
    fn from(value: LogOutput) -> Self {
        match value {
            LogOutput::Text => LogFormat::Text,
            LogOutput::Json => LogFormat::Json,
        }
    }
}

/// Combinatorial end-to-end tests for Kubernetes storage drivers
#[derive(Parser, Debug)]
#[command(name = "storage-e2e", version, about, long_about = None)]
struct Cli {
    /// Path to the kubeconfig; inferred from the environment when unset
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Directory holding the driver manifests
    #[arg(long, env = "STORAGE_E2E_MANIFEST_DIR", default_value = "manifests")]
    manifest_dir: PathBuf,

    /// Base name for the per-driver test namespace
    #[arg(long, default_value = DEFAULT_NAMESPACE_BASE)]
    namespace_base: String,

    /// Keep test namespaces after the run (for debugging)
    #[arg(long)]
    keep_namespaces: bool,

    /// Seconds a writer/reader pod may take to finish
    #[arg(long, default_value = "300")]
    pod_timeout_secs: u64,

    /// Seconds a claim may take to bind
    #[arg(long, default_value = "300")]
    claim_timeout_secs: u64,

    /// Size requested for provisioned claims
    #[arg(long, default_value = DEFAULT_CLAIM_SIZE)]
    claim_size: String,

    /// Image for writer/reader pods
    #[arg(long, env = "STORAGE_E2E_BUSYBOX_IMAGE", default_value = DEFAULT_BUSYBOX_IMAGE)]
    busybox_image: String,

    /// Seed for node selection
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Shuffle scenario execution order with this seed
    #[arg(long)]
    shuffle_seed: Option<u64>,

    /// Only run scenarios whose name contains this substring (repeatable)
    #[arg(long)]
    focus: Vec<String>,

    /// Skip scenarios whose name contains this substring (repeatable)
    #[arg(long)]
    skip: Vec<String>,

    /// Fail before running when a driver declares capabilities it cannot serve
    #[arg(long)]
    strict_capabilities: bool,

    /// Keep inline and pre-provisioned patterns (the built-in CSI driver only
    /// provisions dynamically)
    #[arg(long)]
    all_patterns: bool,

    /// Override a driver container image, as CONTAINER=IMAGE (repeatable)
    #[arg(long = "image", value_parser = parse_image_override)]
    images: Vec<(String, String)>,

    /// Log output format
    #[arg(long, env = "STORAGE_E2E_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogOutput,
}

fn parse_image_override(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((container, image)) if !container.is_empty() && !image.is_empty() => {
            Ok((container.to_string(), image.to_string()))
        }
        _ => Err(format!("expected CONTAINER=IMAGE, got {:?}", s)),
    }
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            kubeconfig: self.kubeconfig.clone(),
            manifest_dir: self.manifest_dir.clone(),
            namespace_base: self.namespace_base.clone(),
            delete_namespace: !self.keep_namespaces,
            pod_timeout: Duration::from_secs(self.pod_timeout_secs),
            claim_timeout: Duration::from_secs(self.claim_timeout_secs),
            claim_size: self.claim_size.clone(),
            busybox_image: self.busybox_image.clone(),
            seed: self.seed,
            shuffle_seed: self.shuffle_seed,
            focus: self.focus.clone(),
            skip: self.skip.clone(),
            strict_capabilities: self.strict_capabilities,
            dynamic_only: !self.all_patterns,
        }
    }

    fn drivers(&self) -> Vec<DriverFactory> {
        let images = self.images.clone();
        let hostpath: DriverFactory = Arc::new(move || {
            let driver = images
                .iter()
                .fold(CsiHostpathDriver::new(), |d, (container, image)| {
                    d.with_image(container, image)
                });
            Box::new(driver) as Box<dyn TestDriver>
        });
        vec![hostpath]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_format.into())
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let config = Arc::new(cli.run_config());
    let client = create_client(config.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(client));

    info!(
        manifest_dir = %config.manifest_dir.display(),
        namespace_base = %config.namespace_base,
        "starting storage e2e run"
    );

    let matrix = MatrixRunner::new(Arc::clone(&config), cluster)
        .with_drivers(cli.drivers())
        .with_suites(builtin_suites())
        .register()
        .map_err(|e| anyhow::anyhow!("Failed to register test matrix: {}", e))?;

    let report = matrix.run().await;
    if !report.is_success() {
        error!(failed = report.failed(), "storage e2e run failed");
        anyhow::bail!(
            "{} of {} scenarios failed",
            report.failed(),
            report.results.len()
        );
    }
    Ok(())
}
