//! `volumeMode` suite: raw block volumes attach as devices

use async_trait::async_trait;

use storage_e2e_common::Error;

use super::pods::{block_script, claim_volume, TestPod};
use super::{
    provision_bound_claim, run_pod_expecting_success, ScenarioContext, SuiteRequirements,
    TestSuite, TestSuiteInfo,
};
use crate::pattern::{DEFAULT_FS_DYNAMIC_PV, DEFAULT_FS_PREPROVISIONED_PV};
use crate::resource::VolumeMode;

const SUITE_NAME: &str = "volumeMode";

/// Provisions a raw block claim and attaches it to a pod as a device
pub struct VolumeModeTestSuite {
    info: TestSuiteInfo,
}

impl VolumeModeTestSuite {
    /// Suite over pre-provisioned and dynamic block volumes
    pub fn new() -> Self {
        Self {
            info: TestSuiteInfo {
                name: SUITE_NAME.to_string(),
                feature_tag: "[Feature:BlockVolume]".to_string(),
                test_patterns: vec![DEFAULT_FS_PREPROVISIONED_PV, DEFAULT_FS_DYNAMIC_PV],
                requirements: SuiteRequirements {
                    fs_group: false,
                    block: true,
                },
            },
        }
    }
}

impl Default for VolumeModeTestSuite {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TestSuite for VolumeModeTestSuite {
    fn info(&self) -> &TestSuiteInfo {
        &self.info
    }

    async fn execute(&self, ctx: &mut ScenarioContext<'_>) -> Result<(), Error> {
        let claim = provision_bound_claim(ctx, VolumeMode::Block).await?;
        let volume = claim_volume(claim.metadata.name.as_deref().unwrap_or_default());

        let info = ctx.driver.driver_info();
        let pod = TestPod {
            name_prefix: "block-consumer",
            image: ctx.framework.config().busybox_image.as_str(),
            script: block_script(),
            volume,
            block: true,
            node_name: info.config.client_node_name.as_deref(),
            fs_group: None,
        }
        .build();
        run_pod_expecting_success(ctx, SUITE_NAME, "block consumer", &pod).await
    }
}
