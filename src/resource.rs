//! Resource lifecycle manager
//!
//! [`GenericVolumeTestResource::setup`] binds a driver and pattern to the
//! cluster objects a scenario needs. It only hands out a resource when setup
//! completed; a combination that cannot be served is reported as a skip and
//! leaves nothing behind. `teardown` releases everything the resource owns and
//! is safe to call more than once.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeSpec,
    Volume, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info, warn};

use storage_e2e_common::Error;

use crate::compat::Skip;
use crate::driver::{TestDriver, TestVolume};
use crate::framework::Framework;
use crate::pattern::{TestPattern, TestVolType};

/// How a provisioned claim is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeMode {
    /// Mounted as a filesystem
    Filesystem,
    /// Attached as a raw block device
    Block,
}

impl VolumeMode {
    /// API string for the mode
    pub fn as_str(self) -> &'static str {
        match self {
            VolumeMode::Filesystem => "Filesystem",
            VolumeMode::Block => "Block",
        }
    }
}

/// Result of setting up one scenario
#[derive(Debug)]
pub enum SetupOutcome {
    /// Setup completed; the resource must be torn down
    Ready(GenericVolumeTestResource),
    /// The combination cannot run; nothing was left in the cluster
    Skipped(Skip),
}

/// Cluster objects owned by one scenario
#[derive(Debug)]
pub struct GenericVolumeTestResource {
    driver_name: String,
    pattern: TestPattern,
    volume: Option<TestVolume>,
    pv_source: Option<PersistentVolumeSpec>,
    persistent_volume: Option<String>,
    storage_class: Option<StorageClass>,
    claims: Vec<String>,
    released: bool,
}

impl GenericVolumeTestResource {
    fn new(driver_name: &str, pattern: &TestPattern) -> Self {
        Self {
            driver_name: driver_name.to_string(),
            pattern: pattern.clone(),
            volume: None,
            pv_source: None,
            persistent_volume: None,
            storage_class: None,
            claims: Vec::new(),
            released: false,
        }
    }

    /// Prepare the objects a scenario for `pattern` needs
    ///
    /// Inline and pre-provisioned patterns get a concrete volume from the
    /// driver. A pre-provisioned volume is exposed through a PersistentVolume
    /// and a claim bound to it once the scenario asks for a claim, so the
    /// claim's volume mode is the scenario's choice. Dynamic patterns get the
    /// driver's StorageClass created in the cluster; the scenario provisions
    /// claims against it.
    pub async fn setup(
        framework: &Framework,
        driver: &dyn TestDriver,
        pattern: &TestPattern,
    ) -> Result<SetupOutcome, Error> {
        let name = driver.driver_info().name.as_str();
        let mut resource = Self::new(name, pattern);

        match pattern.vol_type() {
            TestVolType::InlineVolume | TestVolType::PreprovisionedPV => {
                let Some(creator) = driver.as_preprovisioned() else {
                    return Ok(SetupOutcome::Skipped(Skip::new(format!(
                        "Driver {:?} cannot create volumes for {} - skipping",
                        name,
                        pattern.vol_type()
                    ))));
                };
                let volume = creator
                    .create_volume(framework, pattern.vol_type())
                    .await
                    .map_err(|e| Error::setup(name, pattern.to_string(), e.to_string()))?;

                let needs_pv = pattern.vol_type() == TestVolType::PreprovisionedPV;
                let pv_source = if needs_pv {
                    creator.persistent_volume_source(&volume)
                } else {
                    None
                };
                let missing = if volume.source.is_none() {
                    Some("a volume source")
                } else if needs_pv && pv_source.is_none() {
                    Some("a persistent volume source")
                } else {
                    None
                };
                if let Some(missing) = missing {
                    if let Err(e) = creator
                        .delete_volume(framework, pattern.vol_type(), &volume)
                        .await
                    {
                        warn!(
                            driver = %name,
                            volume = %volume.id,
                            error = %e,
                            "failed to delete volume without source"
                        );
                    }
                    return Ok(SetupOutcome::Skipped(Skip::new(format!(
                        "Driver {:?} does not provide {} for {} - skipping",
                        name, missing, pattern
                    ))));
                }
                debug!(
                    driver = %name,
                    pattern = %pattern,
                    volume = %volume.id,
                    "created test volume"
                );
                resource.volume = Some(volume);
                resource.pv_source = pv_source;
            }
            TestVolType::DynamicPV => {
                let Some(provisioner) = driver.as_dynamic_pv() else {
                    return Ok(SetupOutcome::Skipped(Skip::new(format!(
                        "Driver {:?} does not support dynamic provisioning - skipping",
                        name
                    ))));
                };
                let class =
                    provisioner.dynamic_provision_storage_class(framework, pattern.fs_type());
                let created = framework
                    .client()
                    .create_storage_class(&class)
                    .await
                    .map_err(|e| Error::setup(name, pattern.to_string(), e.to_string()))?;
                debug!(
                    driver = %name,
                    pattern = %pattern,
                    storage_class = created.metadata.name.as_deref().unwrap_or_default(),
                    "created storage class"
                );
                resource.storage_class = Some(created);
            }
        }

        info!(driver = %name, pattern = %pattern, "scenario resources ready");
        Ok(SetupOutcome::Ready(resource))
    }

    /// Pattern this resource was set up for
    pub fn pattern(&self) -> &TestPattern {
        &self.pattern
    }

    /// Volume to mount directly in scenario pods
    ///
    /// Only inline patterns have one; the others are consumed through a claim
    /// from [`GenericVolumeTestResource::provision_claim`].
    pub fn volume_source(&self) -> Option<&Volume> {
        if self.pattern.vol_type() != TestVolType::InlineVolume {
            return None;
        }
        self.volume.as_ref().and_then(|v| v.source.as_ref())
    }

    /// Name of the PersistentVolume exposing a pre-provisioned volume, once
    /// claimed
    pub fn persistent_volume_name(&self) -> Option<&str> {
        self.persistent_volume.as_deref()
    }

    /// StorageClass created for a dynamic pattern
    pub fn storage_class(&self) -> Option<&StorageClass> {
        self.storage_class.as_ref()
    }

    /// Name of the StorageClass created for a dynamic pattern
    pub fn storage_class_name(&self) -> Option<&str> {
        self.storage_class
            .as_ref()
            .and_then(|sc| sc.metadata.name.as_deref())
    }

    /// Claims provisioned so far, by name
    pub fn claims(&self) -> &[String] {
        &self.claims
    }

    /// Provision a claim for the scenario
    ///
    /// Dynamic patterns provision against the resource's StorageClass. A
    /// pre-provisioned pattern gets a PersistentVolume for the driver's volume
    /// and a claim bound to it; its single volume can be claimed once. The
    /// resource owns everything created here and deletes it on teardown.
    pub async fn provision_claim(
        &mut self,
        framework: &Framework,
        mode: VolumeMode,
    ) -> Result<PersistentVolumeClaim, Error> {
        let size = framework.config().claim_size.as_str();
        let claim = if let Some(class) = self.storage_class_name() {
            claim_for(class, size, mode)
        } else if let Some(source) = &self.pv_source {
            if self.persistent_volume.is_some() {
                return Err(self.setup_error("pre-provisioned volume is already claimed"));
            }
            let volume = persistent_volume_for(source, framework.namespace(), size, mode);
            let created = framework.client().create_persistent_volume(&volume).await?;
            let pv = created.metadata.name.ok_or_else(|| {
                Error::internal_with_context("provision_claim", "server returned no volume name")
            })?;
            debug!(
                driver = %self.driver_name,
                persistent_volume = %pv,
                "created persistent volume"
            );
            self.persistent_volume = Some(pv.clone());
            claim_for_volume(&pv, size, mode)
        } else {
            return Err(self.setup_error("pattern has no storage class or volume to claim"));
        };

        let created = framework
            .client()
            .create_claim(framework.namespace(), &claim)
            .await?;
        let name = created.metadata.name.clone().ok_or_else(|| {
            Error::internal_with_context("provision_claim", "server returned no claim name")
        })?;
        debug!(driver = %self.driver_name, claim = %name, mode = mode.as_str(), "created claim");
        self.claims.push(name);
        Ok(created)
    }

    fn setup_error(&self, message: &str) -> Error {
        Error::setup(&self.driver_name, self.pattern.to_string(), message)
    }

    /// Release everything this resource owns
    ///
    /// Every release is attempted even if an earlier one fails; the first
    /// failure is returned. A second call does nothing.
    pub async fn teardown(
        &mut self,
        framework: &Framework,
        driver: &dyn TestDriver,
    ) -> Result<(), Error> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first_error = None;
        let driver_name = self.driver_name.as_str();
        let pattern = &self.pattern;
        let mut record = |result: Result<(), Error>, what: &str| {
            if let Err(e) = result {
                warn!(
                    driver = %driver_name,
                    pattern = %pattern,
                    error = %e,
                    "failed to release {}",
                    what
                );
                first_error.get_or_insert(e);
            }
        };

        for claim in std::mem::take(&mut self.claims) {
            let result = framework
                .client()
                .delete_claim(framework.namespace(), &claim)
                .await;
            record(result, "claim");
        }

        if let Some(pv) = self.persistent_volume.take() {
            let result = framework.client().delete_persistent_volume(&pv).await;
            record(result, "persistent volume");
        }
        self.pv_source = None;

        if let Some(class) = self.storage_class.take() {
            let name = class.metadata.name.unwrap_or_default();
            let result = framework.client().delete_storage_class(&name).await;
            record(result, "storage class");
        }

        if let Some(volume) = self.volume.take() {
            let result = match driver.as_preprovisioned() {
                Some(creator) => {
                    creator
                        .delete_volume(framework, self.pattern.vol_type(), &volume)
                        .await
                }
                None => Err(Error::internal_with_context(
                    "teardown",
                    "driver lost its volume capability",
                )),
            };
            record(result, "volume");
        }

        info!(driver = %self.driver_name, pattern = %self.pattern, "scenario resources released");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for GenericVolumeTestResource {
    fn drop(&mut self) {
        let owns_anything = self.volume.is_some()
            || self.persistent_volume.is_some()
            || self.storage_class.is_some()
            || !self.claims.is_empty();
        if !self.released && owns_anything {
            warn!(
                driver = %self.driver_name,
                pattern = %self.pattern,
                "test resource dropped without teardown; cluster objects may leak"
            );
        }
    }
}

fn storage_request(size: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([("storage".to_string(), Quantity(size.to_string()))])
}

/// PersistentVolume of `size` over `source`, named after `namespace`
///
/// The volume is retained on release; the driver that created the backing
/// storage deletes it.
pub fn persistent_volume_for(
    source: &PersistentVolumeSpec,
    namespace: &str,
    size: &str,
    mode: VolumeMode,
) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-pv-", namespace)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            capacity: Some(storage_request(size)),
            persistent_volume_reclaim_policy: Some("Retain".to_string()),
            storage_class_name: Some(String::new()),
            volume_mode: Some(mode.as_str().to_string()),
            ..source.clone()
        }),
        ..Default::default()
    }
}

/// Claim bound to the PersistentVolume named `volume_name`
pub fn claim_for_volume(volume_name: &str, size: &str, mode: VolumeMode) -> PersistentVolumeClaim {
    let mut claim = claim_for("", size, mode);
    if let Some(spec) = claim.spec.as_mut() {
        spec.volume_name = Some(volume_name.to_string());
    }
    claim
}

/// Claim requesting `size` from `storage_class`
///
/// An empty class name opts out of the cluster's default StorageClass.
pub fn claim_for(storage_class: &str, size: &str, mode: VolumeMode) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            generate_name: Some("pvc-".to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(storage_class.to_string()),
            volume_mode: Some(mode.as_str().to_string()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(storage_request(size)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
