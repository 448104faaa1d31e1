//! `provisioning` suite: a claim against the driver's StorageClass binds
//!
//! For patterns naming a filesystem type the class must request that type.

use async_trait::async_trait;
use tracing::info;

use storage_e2e_common::Error;

use super::{
    provision_bound_claim, ScenarioContext, SuiteRequirements, TestSuite, TestSuiteInfo,
};
use crate::pattern::{DEFAULT_FS_DYNAMIC_PV, EXT3_DYNAMIC_PV, EXT4_DYNAMIC_PV, XFS_DYNAMIC_PV};
use crate::resource::VolumeMode;
use crate::storage_class::FS_TYPE_PARAMETER;

const SUITE_NAME: &str = "provisioning";

/// Dynamically provisions a claim and checks it is bound through the
/// driver's StorageClass
pub struct ProvisioningTestSuite {
    info: TestSuiteInfo,
}

impl ProvisioningTestSuite {
    /// Suite over the dynamic patterns for each filesystem type
    pub fn new() -> Self {
        Self {
            info: TestSuiteInfo {
                name: SUITE_NAME.to_string(),
                feature_tag: String::new(),
                test_patterns: vec![
                    DEFAULT_FS_DYNAMIC_PV,
                    EXT3_DYNAMIC_PV,
                    EXT4_DYNAMIC_PV,
                    XFS_DYNAMIC_PV,
                ],
                requirements: SuiteRequirements::default(),
            },
        }
    }
}

impl Default for ProvisioningTestSuite {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TestSuite for ProvisioningTestSuite {
    fn info(&self) -> &TestSuiteInfo {
        &self.info
    }

    async fn execute(&self, ctx: &mut ScenarioContext<'_>) -> Result<(), Error> {
        let expected = ctx
            .resource
            .storage_class_name()
            .map(str::to_string)
            .ok_or_else(|| Error::execution(SUITE_NAME, "scenario has no storage class"))?;

        let fs_type = ctx.pattern.fs_type();
        if !fs_type.is_empty() {
            let requested = ctx
                .resource
                .storage_class()
                .and_then(|sc| sc.parameters.as_ref())
                .and_then(|p| p.get(FS_TYPE_PARAMETER));
            if requested.map(String::as_str) != Some(fs_type) {
                return Err(Error::execution(
                    SUITE_NAME,
                    format!(
                        "storage class {} requests fs type {:?}, expected {:?}",
                        expected, requested, fs_type
                    ),
                ));
            }
        }

        let claim = provision_bound_claim(ctx, VolumeMode::Filesystem).await?;
        let name = claim.metadata.name.clone().unwrap_or_default();

        let phase = claim.status.as_ref().and_then(|s| s.phase.as_deref());
        if phase != Some("Bound") {
            return Err(Error::execution(
                SUITE_NAME,
                format!("claim {} is {:?}, expected Bound", name, phase),
            ));
        }

        let class = claim
            .spec
            .as_ref()
            .and_then(|s| s.storage_class_name.as_deref());
        if class != Some(expected.as_str()) {
            return Err(Error::execution(
                SUITE_NAME,
                format!(
                    "claim {} uses storage class {:?}, expected {:?}",
                    name, class, expected
                ),
            ));
        }

        info!(claim = %name, storage_class = %expected, "claim provisioned");
        Ok(())
    }
}
