//! `volumes` suite: data written through a volume can be read back
//!
//! Besides a marker file the writer stores a file of the largest size the
//! driver declares, and the reader checks it kept that size.

use async_trait::async_trait;
use tracing::info;

use storage_e2e_common::Error;

use super::pods::{
    claim_volume, fill_script, size_check_script, verify_script, write_script, TestPod,
};
use super::{
    provision_bound_claim, run_pod_expecting_success, ScenarioContext, SuiteRequirements,
    TestSuite, TestSuiteInfo,
};
use crate::compat::Skip;
use crate::driver::TestDriver;
use crate::pattern::{
    TestPattern, DEFAULT_FS_DYNAMIC_PV, DEFAULT_FS_INLINE_VOLUME, DEFAULT_FS_PREPROVISIONED_PV,
};
use crate::resource::VolumeMode;

const SUITE_NAME: &str = "volumes";
const FS_GROUP: i64 = 1234;
const INDEX_FILE: &str = "index.html";
const DATA_FILE: &str = "data.bin";

/// Writes a marker file with one pod and reads it back with another
pub struct VolumesTestSuite {
    info: TestSuiteInfo,
}

impl VolumesTestSuite {
    /// Suite over the default-fs patterns of every volume type
    pub fn new() -> Self {
        Self {
            info: TestSuiteInfo {
                name: SUITE_NAME.to_string(),
                feature_tag: String::new(),
                test_patterns: vec![
                    DEFAULT_FS_INLINE_VOLUME,
                    DEFAULT_FS_PREPROVISIONED_PV,
                    DEFAULT_FS_DYNAMIC_PV,
                ],
                requirements: SuiteRequirements::default(),
            },
        }
    }
}

impl Default for VolumesTestSuite {
    fn default() -> Self {
        Self::new()
    }
}

/// Content the writer pod stores and the reader pod expects
pub fn expected_content(driver: &str, namespace: &str) -> String {
    format!("Hello from {} from namespace {}", driver, namespace)
}

#[async_trait]
impl TestSuite for VolumesTestSuite {
    fn info(&self) -> &TestSuiteInfo {
        &self.info
    }

    fn skip_unsupported(&self, _pattern: &TestPattern, driver: &dyn TestDriver) -> Option<Skip> {
        let info = driver.driver_info();
        (!info.is_persistent).then(|| {
            Skip::new(format!(
                "Driver {:?} does not provide persistency - skipping",
                info.name
            ))
        })
    }

    async fn execute(&self, ctx: &mut ScenarioContext<'_>) -> Result<(), Error> {
        let volume = match ctx.resource.volume_source() {
            Some(source) => source.clone(),
            None => {
                let claim = provision_bound_claim(ctx, VolumeMode::Filesystem).await?;
                claim_volume(claim.metadata.name.as_deref().unwrap_or_default())
            }
        };

        let info = ctx.driver.driver_info();
        let fw = ctx.framework;
        let content = expected_content(&info.name, fw.namespace());
        let fs_group = info.is_fs_group_supported.then_some(FS_GROUP);
        let node = info.config.client_node_name.as_deref();
        let image = fw.config().busybox_image.as_str();
        let data_size = info.max_file_size.bytes();

        info!(
            driver = %info.name,
            pattern = %ctx.pattern,
            data_size,
            "writing {} and {}",
            INDEX_FILE,
            DATA_FILE
        );
        let writer = TestPod {
            name_prefix: "volume-writer",
            image,
            script: format!(
                "{} && {}",
                write_script(INDEX_FILE, &content),
                fill_script(DATA_FILE, data_size)
            ),
            volume: volume.clone(),
            block: false,
            node_name: node,
            fs_group,
        }
        .build();
        run_pod_expecting_success(ctx, SUITE_NAME, "writer", &writer).await?;

        let reader = TestPod {
            name_prefix: "volume-reader",
            image,
            script: format!(
                "{} && {}",
                verify_script(INDEX_FILE, &content, fs_group),
                size_check_script(DATA_FILE, data_size)
            ),
            volume,
            block: false,
            node_name: node,
            fs_group,
        }
        .build();
        run_pod_expecting_success(ctx, SUITE_NAME, "reader", &reader).await
    }
}
