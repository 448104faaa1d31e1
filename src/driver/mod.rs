//! Driver contracts
//!
//! A driver describes one storage backend under test. Every driver implements
//! the core [`TestDriver`] contract; the optional extension contracts
//! ([`DynamicPvTestDriver`], [`PreprovisionedVolumeTestDriver`]) are exposed
//! through `as_*` accessors that callers check before use.

pub mod hostpath;

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeSpec, Volume};
use k8s_openapi::api::storage::v1::StorageClass;

use storage_e2e_common::Error;

use crate::capability::DriverInfo;
use crate::compat::Skip;
use crate::framework::Framework;
use crate::pattern::{TestPattern, TestVolType};

pub use hostpath::CsiHostpathDriver;

/// Zero-argument driver constructor registered with the matrix runner
pub type DriverFactory = Arc<dyn Fn() -> Box<dyn TestDriver> + Send + Sync>;

/// Core driver contract
#[async_trait]
pub trait TestDriver: Send + Sync {
    /// Capability description
    fn driver_info(&self) -> &DriverInfo;

    /// Driver-specific skip decision, consulted after the shared checks
    fn skip_unsupported_test(&self, _pattern: &TestPattern) -> Option<Skip> {
        None
    }

    /// Install the driver into the framework's namespace
    ///
    /// Called once per driver before any of its scenarios.
    async fn create_driver(&mut self, framework: &Framework) -> Result<(), Error>;

    /// Remove everything `create_driver` installed
    ///
    /// Called exactly once after the driver's last scenario, including when
    /// `create_driver` failed partway.
    async fn cleanup_driver(&mut self) -> Result<(), Error>;

    /// Dynamic provisioning capability, if the driver has one
    fn as_dynamic_pv(&self) -> Option<&dyn DynamicPvTestDriver> {
        None
    }

    /// Pre-provisioned volume capability, if the driver has one
    fn as_preprovisioned(&self) -> Option<&dyn PreprovisionedVolumeTestDriver> {
        None
    }
}

/// Drivers that provision volumes through a StorageClass
pub trait DynamicPvTestDriver: Send + Sync {
    /// StorageClass that provisions volumes of `fs_type` with this driver
    fn dynamic_provision_storage_class(&self, framework: &Framework, fs_type: &str) -> StorageClass;
}

/// Drivers that can create a concrete volume ahead of a scenario
#[async_trait]
pub trait PreprovisionedVolumeTestDriver: Send + Sync {
    /// Create a volume for an inline or pre-provisioned pattern
    async fn create_volume(
        &self,
        framework: &Framework,
        vol_type: TestVolType,
    ) -> Result<TestVolume, Error>;

    /// Delete a volume returned by `create_volume`
    async fn delete_volume(
        &self,
        framework: &Framework,
        vol_type: TestVolType,
        volume: &TestVolume,
    ) -> Result<(), Error>;

    /// Source fields of a PersistentVolume exposing `volume`
    ///
    /// Only the volume source fields are read from the returned spec. The
    /// default derives them from the inline source; drivers whose inline
    /// source has no PersistentVolume counterpart override this.
    fn persistent_volume_source(&self, volume: &TestVolume) -> Option<PersistentVolumeSpec> {
        volume.source.as_ref().and_then(persistent_volume_source)
    }
}

/// PersistentVolume source equivalent to an inline volume source
///
/// `None` when the inline source kind cannot back a PersistentVolume.
pub fn persistent_volume_source(volume: &Volume) -> Option<PersistentVolumeSpec> {
    let spec = PersistentVolumeSpec {
        host_path: volume.host_path.clone(),
        nfs: volume.nfs.clone(),
        fc: volume.fc.clone(),
        gce_persistent_disk: volume.gce_persistent_disk.clone(),
        aws_elastic_block_store: volume.aws_elastic_block_store.clone(),
        ..Default::default()
    };
    let has_source = spec.host_path.is_some()
        || spec.nfs.is_some()
        || spec.fc.is_some()
        || spec.gce_persistent_disk.is_some()
        || spec.aws_elastic_block_store.is_some();
    has_source.then_some(spec)
}

/// A volume created by a driver for one scenario
#[derive(Debug, Clone, PartialEq)]
pub struct TestVolume {
    /// Driver-specific identifier used for deletion
    pub id: String,
    /// Volume source to mount in scenario pods; `None` when the driver could
    /// not produce one
    pub source: Option<Volume>,
}

/// `[Driver: <name>]<feature tag>`
pub fn driver_name_with_feature_tags(info: &DriverInfo) -> String {
    format!("[Driver: {}]{}", info.name, info.feature_tag)
}

/// `<name>-<framework unique name>`; the name a driver registers under
pub fn unique_driver_name(info: &DriverInfo, framework: &Framework) -> String {
    format!("{}-{}", info.name, framework.unique_name())
}
