//! csi-hostpath sample driver
//!
//! Installs the CSI hostpath plugin with its attacher and provisioner
//! sidecars, pinned to one node, under a name unique to the framework.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::storage::v1::StorageClass;
use tracing::{info, warn};

use storage_e2e_common::Error;

use super::{unique_driver_name, DynamicPvTestDriver, TestDriver};
use crate::capability::{DriverInfo, FileSizeClass};
use crate::deploy::{
    create_from_manifests, patch_csi_deployment, FileManifestStore, ManifestStore, PatchOptions,
    Teardown,
};
use crate::framework::Framework;
use crate::storage_class::{fs_type_parameters, get_storage_class};

/// Driver name in the stock manifests
pub const DRIVER_NAME: &str = "csi-hostpath";

/// Manifests installed, in order, relative to the manifest directory
pub const MANIFESTS: &[&str] = &[
    "driver-registrar/rbac.yaml",
    "external-attacher/rbac.yaml",
    "external-provisioner/rbac.yaml",
    "hostpath/hostpath/csi-hostpath-attacher.yaml",
    "hostpath/hostpath/csi-hostpath-provisioner.yaml",
    "hostpath/hostpath/csi-hostpathplugin.yaml",
    "hostpath/hostpath/e2e-test-rbac.yaml",
];

const DRIVER_CONTAINER: &str = "hostpath";
const PROVISIONER_CONTAINER: &str = "csi-provisioner";

/// The csi-hostpath driver
pub struct CsiHostpathDriver {
    info: DriverInfo,
    store: Option<Arc<dyn ManifestStore>>,
    images: BTreeMap<String, String>,
    teardown: Option<Teardown>,
}

impl CsiHostpathDriver {
    /// Driver reading manifests from the run's manifest directory
    pub fn new() -> Self {
        Self {
            info: DriverInfo::new(DRIVER_NAME)
                .persistent(true)
                .with_max_file_size(FileSizeClass::Medium),
            store: None,
            images: BTreeMap::new(),
            teardown: None,
        }
    }

    /// Read manifests from `store` instead of the manifest directory
    pub fn with_store(mut self, store: Arc<dyn ManifestStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the image of the container named `container`
    pub fn with_image(mut self, container: impl Into<String>, image: impl Into<String>) -> Self {
        self.images.insert(container.into(), image.into());
        self
    }
}

impl Default for CsiHostpathDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TestDriver for CsiHostpathDriver {
    fn driver_info(&self) -> &DriverInfo {
        &self.info
    }

    async fn create_driver(&mut self, framework: &Framework) -> Result<(), Error> {
        info!(
            driver = %self.info.name,
            namespace = %framework.namespace(),
            "deploying csi hostpath driver"
        );

        let node = framework.pick_node().await?;
        self.info.config.client_node_name = Some(node.clone());
        self.info.config.server_node_name = Some(node.clone());

        let opts = PatchOptions {
            old_driver_name: self.info.name.clone(),
            new_driver_name: unique_driver_name(&self.info, framework),
            driver_container_name: DRIVER_CONTAINER.to_string(),
            provisioner_container_name: PROVISIONER_CONTAINER.to_string(),
            node_name: Some(node),
            images: self.images.clone(),
        };

        let store: Arc<dyn ManifestStore> = match &self.store {
            Some(store) => Arc::clone(store),
            None => Arc::new(FileManifestStore::new(&framework.config().manifest_dir)),
        };

        let (teardown, result) = create_from_manifests(
            framework,
            store.as_ref(),
            &self.info.name,
            |doc| patch_csi_deployment(framework, &opts, doc),
            MANIFESTS,
        )
        .await;
        self.teardown = Some(teardown);
        result
    }

    async fn cleanup_driver(&mut self) -> Result<(), Error> {
        match self.teardown.take() {
            Some(teardown) => {
                info!(driver = %self.info.name, "uninstalling csi hostpath driver");
                teardown.run().await
            }
            None => {
                warn!(driver = %self.info.name, "driver was never installed");
                Ok(())
            }
        }
    }

    fn as_dynamic_pv(&self) -> Option<&dyn DynamicPvTestDriver> {
        Some(self)
    }
}

impl DynamicPvTestDriver for CsiHostpathDriver {
    fn dynamic_provision_storage_class(
        &self,
        framework: &Framework,
        fs_type: &str,
    ) -> StorageClass {
        let provisioner = unique_driver_name(&self.info, framework);
        let suffix = format!("{}-sc", provisioner);
        get_storage_class(
            &provisioner,
            fs_type_parameters(fs_type),
            None,
            framework.namespace(),
            &suffix,
        )
    }
}
