//! Driver capability model
//!
//! What a storage backend supports. Suites and the compatibility filter read
//! these flags; nothing here talks to the cluster.

use std::collections::BTreeSet;

/// Filesystem type string meaning "whatever the driver defaults to"
pub const DEFAULT_FS_TYPE: &str = "";

/// Largest file a suite may write through a driver's volumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileSizeClass {
    /// 1 MiB
    Small,
    /// 100 MiB
    Medium,
    /// 1 GiB
    Large,
}

impl FileSizeClass {
    /// Size limit in bytes
    pub fn bytes(self) -> u64 {
        const MIB: u64 = 1024 * 1024;
        match self {
            FileSizeClass::Small => MIB,
            FileSizeClass::Medium => 100 * MIB,
            FileSizeClass::Large => 1024 * MIB,
        }
    }
}

/// Node placement for the driver's server-side pods and the test's client pods
///
/// Filled in when the driver is installed; empty until then.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeTestConfig {
    /// Prefix for objects the suites create
    pub prefix: String,
    /// Node the client pods must run on
    pub client_node_name: Option<String>,
    /// Node the driver's server pods are pinned to
    pub server_node_name: Option<String>,
}

/// Description of a driver under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    /// Driver name, unique within a run before suffixing
    pub name: String,
    /// Free-text annotation appended to scenario names (e.g. `[Feature:CSI]`)
    pub feature_tag: String,
    /// Volumes survive the pod that used them
    pub is_persistent: bool,
    /// fsGroup ownership is applied to volume contents
    pub is_fs_group_supported: bool,
    /// Raw block volumes are supported
    pub is_block_supported: bool,
    /// Supported filesystem types; [`DEFAULT_FS_TYPE`] denotes the default
    pub supported_fs_types: BTreeSet<String>,
    /// Largest file suites may write
    pub max_file_size: FileSizeClass,
    /// Node placement, set at install time
    pub config: VolumeTestConfig,
}

impl DriverInfo {
    /// Create a driver description with every optional capability disabled
    /// and only the default filesystem type supported
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            config: VolumeTestConfig {
                prefix: name.clone(),
                ..Default::default()
            },
            name,
            feature_tag: String::new(),
            is_persistent: false,
            is_fs_group_supported: false,
            is_block_supported: false,
            supported_fs_types: BTreeSet::from([DEFAULT_FS_TYPE.to_string()]),
            max_file_size: FileSizeClass::Small,
        }
    }

    /// Set the feature tag
    pub fn with_feature_tag(mut self, tag: impl Into<String>) -> Self {
        self.feature_tag = tag.into();
        self
    }

    /// Mark volumes as persistent
    pub fn persistent(mut self, value: bool) -> Self {
        self.is_persistent = value;
        self
    }

    /// Mark fsGroup as supported
    pub fn fs_group(mut self, value: bool) -> Self {
        self.is_fs_group_supported = value;
        self
    }

    /// Mark raw block volumes as supported
    pub fn block(mut self, value: bool) -> Self {
        self.is_block_supported = value;
        self
    }

    /// Replace the supported filesystem types
    pub fn with_fs_types<I, S>(mut self, fs_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_fs_types = fs_types.into_iter().map(Into::into).collect();
        self
    }

    /// Set the maximum file size class
    pub fn with_max_file_size(mut self, size: FileSizeClass) -> Self {
        self.max_file_size = size;
        self
    }

    /// Whether the given filesystem type is supported
    pub fn supports_fs_type(&self, fs_type: &str) -> bool {
        self.supported_fs_types.contains(fs_type)
    }
}
