//! Run configuration
//!
//! One `RunConfig` is built per run (by the CLI or a test) and shared by
//! `Arc` with every component that needs it. Nothing in the orchestration
//! core reads process-wide state.

use std::path::PathBuf;
use std::time::Duration;

/// Default namespace base name; the server appends a random suffix
pub const DEFAULT_NAMESPACE_BASE: &str = "csi-volumes";

/// Default size requested for dynamically provisioned claims
pub const DEFAULT_CLAIM_SIZE: &str = "2Gi";

/// Default image for writer/reader pods
pub const DEFAULT_BUSYBOX_IMAGE: &str = "busybox:1.36";

/// Configuration for one matrix run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Kubeconfig path; inferred when unset
    pub kubeconfig: Option<PathBuf>,
    /// Directory driver manifests are read from
    pub manifest_dir: PathBuf,
    /// Base name for the per-driver test namespace
    pub namespace_base: String,
    /// Delete the test namespace after the driver's scenarios
    pub delete_namespace: bool,
    /// How long a writer/reader pod may take to finish
    pub pod_timeout: Duration,
    /// How long a claim may take to bind
    pub claim_timeout: Duration,
    /// Size requested for provisioned claims
    pub claim_size: String,
    /// Image for writer/reader pods
    pub busybox_image: String,
    /// Seed for node selection
    pub seed: u64,
    /// Shuffle scenario execution order with this seed
    pub shuffle_seed: Option<u64>,
    /// Run only scenarios whose name contains one of these substrings
    pub focus: Vec<String>,
    /// Skip scenarios whose name contains one of these substrings
    pub skip: Vec<String>,
    /// Fail registration on driver configuration inconsistencies
    pub strict_capabilities: bool,
    /// Drop inline and pre-provisioned patterns from every suite
    pub dynamic_only: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            manifest_dir: PathBuf::from("manifests"),
            namespace_base: DEFAULT_NAMESPACE_BASE.to_string(),
            delete_namespace: true,
            pod_timeout: Duration::from_secs(300),
            claim_timeout: Duration::from_secs(300),
            claim_size: DEFAULT_CLAIM_SIZE.to_string(),
            busybox_image: DEFAULT_BUSYBOX_IMAGE.to_string(),
            seed: 0,
            shuffle_seed: None,
            focus: Vec::new(),
            skip: Vec::new(),
            strict_capabilities: false,
            dynamic_only: false,
        }
    }
}

impl RunConfig {
    /// Whether a scenario with this name is selected by the focus/skip filters
    pub fn selects(&self, scenario_name: &str) -> bool {
        let focused =
            self.focus.is_empty() || self.focus.iter().any(|f| scenario_name.contains(f.as_str()));
        let skipped = self.skip.iter().any(|s| scenario_name.contains(s.as_str()));
        focused && !skipped
    }
}
