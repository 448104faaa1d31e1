//! Dynamic StorageClass construction

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// When a claim against the class gets bound
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VolumeBindingMode {
    /// Bind and provision as soon as the claim exists
    #[default]
    Immediate,
    /// Delay until a pod using the claim is scheduled
    WaitForFirstConsumer,
}

impl VolumeBindingMode {
    /// API string for the mode
    pub fn as_str(self) -> &'static str {
        match self {
            VolumeBindingMode::Immediate => "Immediate",
            VolumeBindingMode::WaitForFirstConsumer => "WaitForFirstConsumer",
        }
    }
}

impl fmt::Display for VolumeBindingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// StorageClass parameter through which CSI provisioners receive the
/// filesystem type
pub const FS_TYPE_PARAMETER: &str = "csi.storage.k8s.io/fstype";

/// Parameters requesting `fs_type`; empty for the driver default
pub fn fs_type_parameters(fs_type: &str) -> BTreeMap<String, String> {
    let mut parameters = BTreeMap::new();
    if !fs_type.is_empty() {
        parameters.insert(FS_TYPE_PARAMETER.to_string(), fs_type.to_string());
    }
    parameters
}

/// Construct a StorageClass named `<namespace>-<suffix>`.
///
/// The namespace prefix keeps the cluster-scoped name distinct across
/// concurrently running namespaces; callers pick a suffix unique per driver
/// within their namespace (usually `<provisioner>-sc`). The binding mode
/// defaults to `Immediate`.
pub fn get_storage_class(
    provisioner: &str,
    parameters: BTreeMap<String, String>,
    binding_mode: Option<VolumeBindingMode>,
    namespace: &str,
    suffix: &str,
) -> StorageClass {
    let binding_mode = binding_mode.unwrap_or_default();
    StorageClass {
        metadata: ObjectMeta {
            name: Some(format!("{}-{}", namespace, suffix)),
            ..Default::default()
        },
        provisioner: provisioner.to_string(),
        parameters: Some(parameters),
        volume_binding_mode: Some(binding_mode.as_str().to_string()),
        ..Default::default()
    }
}
