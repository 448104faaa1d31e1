//! Test suites
//!
//! A suite is a reusable scenario definition. It declares the patterns it can
//! run and the driver capabilities it needs; the matrix runner applies it to
//! every compatible driver and pattern.

pub mod pods;
pub mod provisioning;
pub mod volume_mode;
pub mod volumes;

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use tracing::debug;

use storage_e2e_common::Error;

use crate::cluster::PodPhase;
use crate::compat::Skip;
use crate::driver::TestDriver;
use crate::framework::Framework;
use crate::pattern::TestPattern;
use crate::resource::{GenericVolumeTestResource, VolumeMode};

pub use provisioning::ProvisioningTestSuite;
pub use volume_mode::VolumeModeTestSuite;
pub use volumes::VolumesTestSuite;

/// Zero-argument suite constructor registered with the matrix runner
pub type SuiteFactory = Arc<dyn Fn() -> Box<dyn TestSuite> + Send + Sync>;

/// Driver capabilities a suite exercises
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuiteRequirements {
    /// Checks fsGroup ownership of volume contents
    pub fs_group: bool,
    /// Uses raw block volumes
    pub block: bool,
}

/// Static description of a suite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSuiteInfo {
    /// Suite name
    pub name: String,
    /// Free-text annotation appended to scenario names
    pub feature_tag: String,
    /// Patterns the suite can run, in registration order
    pub test_patterns: Vec<TestPattern>,
    /// Capabilities every scenario of the suite needs
    pub requirements: SuiteRequirements,
}

/// What a scenario body gets to work with
pub struct ScenarioContext<'a> {
    /// The driver's framework
    pub framework: &'a Framework,
    /// Driver under test
    pub driver: &'a dyn TestDriver,
    /// Pattern under test
    pub pattern: &'a TestPattern,
    /// Objects set up for this scenario
    pub resource: &'a mut GenericVolumeTestResource,
}

/// A scenario definition applied across drivers and patterns
#[async_trait]
pub trait TestSuite: Send + Sync {
    /// Static description
    fn info(&self) -> &TestSuiteInfo;

    /// Suite-specific skip decision, consulted after the shared capability
    /// checks
    fn skip_unsupported(&self, _pattern: &TestPattern, _driver: &dyn TestDriver) -> Option<Skip> {
        None
    }

    /// Run the scenario's assertions
    async fn execute(&self, ctx: &mut ScenarioContext<'_>) -> Result<(), Error>;
}

/// `[Testpattern: <pattern>] <suite name><suite tag>`
pub fn test_name_str(info: &TestSuiteInfo, pattern: &TestPattern) -> String {
    format!("[Testpattern: {}] {}{}", pattern, info.name, info.feature_tag)
}

/// Provision the scenario's claim and wait for it to bind
///
/// Dynamic patterns claim through their StorageClass, pre-provisioned ones
/// through the PersistentVolume exposing the driver's volume.
pub async fn provision_bound_claim(
    ctx: &mut ScenarioContext<'_>,
    mode: VolumeMode,
) -> Result<PersistentVolumeClaim, Error> {
    let fw = ctx.framework;
    let claim = ctx.resource.provision_claim(fw, mode).await?;
    let name = claim.metadata.name.unwrap_or_default();
    fw.client()
        .wait_for_claim_bound(fw.namespace(), &name, fw.config().claim_timeout)
        .await
}

/// Run a pod to completion and fail the scenario unless it succeeded
pub async fn run_pod_expecting_success(
    ctx: &ScenarioContext<'_>,
    suite: &str,
    step: &str,
    pod: &Pod,
) -> Result<(), Error> {
    let fw = ctx.framework;
    let phase = fw
        .client()
        .run_pod_to_completion(fw.namespace(), pod, fw.config().pod_timeout)
        .await?;
    debug!(suite = %suite, step = %step, phase = ?phase, "pod finished");
    match phase {
        PodPhase::Succeeded => Ok(()),
        PodPhase::Failed => Err(Error::execution(suite, format!("{} pod failed", step))),
    }
}

/// The built-in suites
pub fn builtin_suites() -> Vec<SuiteFactory> {
    vec![
        Arc::new(|| Box::new(VolumesTestSuite::new()) as Box<dyn TestSuite>),
        Arc::new(|| Box::new(ProvisioningTestSuite::new()) as Box<dyn TestSuite>),
        Arc::new(|| Box::new(VolumeModeTestSuite::new()) as Box<dyn TestSuite>),
    ]
}
