//! Pattern catalog
//!
//! A pattern is one (volume attachment, filesystem type) combination. Suites
//! declare which patterns they can run; a run-wide tuner may drop whole
//! categories before scenarios are registered.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::capability::DEFAULT_FS_TYPE;

/// How a volume reaches the workload under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TestVolType {
    /// Volume declared directly in the pod spec
    InlineVolume,
    /// Volume created ahead of time and bound to the workload
    PreprovisionedPV,
    /// Volume provisioned on demand through a StorageClass
    DynamicPV,
}

impl TestVolType {
    /// Whether the pattern relies on the volume outliving the pod
    pub fn requires_persistence(self) -> bool {
        matches!(self, TestVolType::PreprovisionedPV | TestVolType::DynamicPV)
    }

    /// Whether setup must materialise a concrete volume through the driver
    pub fn needs_volume_creation(self) -> bool {
        matches!(self, TestVolType::InlineVolume | TestVolType::PreprovisionedPV)
    }
}

impl fmt::Display for TestVolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TestVolType::InlineVolume => "Inline-volume",
            TestVolType::PreprovisionedPV => "Pre-provisioned PV",
            TestVolType::DynamicPV => "Dynamic PV",
        })
    }
}

/// A volume attachment kind paired with a filesystem type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestPattern {
    vol_type: TestVolType,
    fs_type: Cow<'static, str>,
}

impl TestPattern {
    /// Pattern with a statically known filesystem type
    pub const fn new(vol_type: TestVolType, fs_type: &'static str) -> Self {
        Self {
            vol_type,
            fs_type: Cow::Borrowed(fs_type),
        }
    }

    /// Pattern with a filesystem type chosen at runtime
    pub fn with_fs_type(vol_type: TestVolType, fs_type: impl Into<String>) -> Self {
        Self {
            vol_type,
            fs_type: Cow::Owned(fs_type.into()),
        }
    }

    /// Volume attachment kind
    pub fn vol_type(&self) -> TestVolType {
        self.vol_type
    }

    /// Filesystem type, empty for the driver default
    pub fn fs_type(&self) -> &str {
        &self.fs_type
    }
}

impl fmt::Display for TestPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fs = if self.fs_type == DEFAULT_FS_TYPE {
            "default"
        } else {
            self.fs_type.as_ref()
        };
        write!(f, "{} ({} fs)", self.vol_type, fs)
    }
}

/// Inline volume, default filesystem
pub const DEFAULT_FS_INLINE_VOLUME: TestPattern =
    TestPattern::new(TestVolType::InlineVolume, DEFAULT_FS_TYPE);
/// Pre-provisioned PV, default filesystem
pub const DEFAULT_FS_PREPROVISIONED_PV: TestPattern =
    TestPattern::new(TestVolType::PreprovisionedPV, DEFAULT_FS_TYPE);
/// Dynamic PV, default filesystem
pub const DEFAULT_FS_DYNAMIC_PV: TestPattern =
    TestPattern::new(TestVolType::DynamicPV, DEFAULT_FS_TYPE);

/// Inline volume, ext3
pub const EXT3_INLINE_VOLUME: TestPattern = TestPattern::new(TestVolType::InlineVolume, "ext3");
/// Pre-provisioned PV, ext3
pub const EXT3_PREPROVISIONED_PV: TestPattern =
    TestPattern::new(TestVolType::PreprovisionedPV, "ext3");
/// Dynamic PV, ext3
pub const EXT3_DYNAMIC_PV: TestPattern = TestPattern::new(TestVolType::DynamicPV, "ext3");

/// Inline volume, ext4
pub const EXT4_INLINE_VOLUME: TestPattern = TestPattern::new(TestVolType::InlineVolume, "ext4");
/// Pre-provisioned PV, ext4
pub const EXT4_PREPROVISIONED_PV: TestPattern =
    TestPattern::new(TestVolType::PreprovisionedPV, "ext4");
/// Dynamic PV, ext4
pub const EXT4_DYNAMIC_PV: TestPattern = TestPattern::new(TestVolType::DynamicPV, "ext4");

/// Inline volume, xfs
pub const XFS_INLINE_VOLUME: TestPattern = TestPattern::new(TestVolType::InlineVolume, "xfs");
/// Pre-provisioned PV, xfs
pub const XFS_PREPROVISIONED_PV: TestPattern =
    TestPattern::new(TestVolType::PreprovisionedPV, "xfs");
/// Dynamic PV, xfs
pub const XFS_DYNAMIC_PV: TestPattern = TestPattern::new(TestVolType::DynamicPV, "xfs");

/// Run-wide pattern filter applied to every suite's declared list.
///
/// Must be pure: it receives the suite's list by reference and returns a new
/// ordered list.
pub type PatternTuner = Arc<dyn Fn(&[TestPattern]) -> Vec<TestPattern> + Send + Sync>;

/// Tuner that keeps every pattern
pub fn keep_all() -> PatternTuner {
    Arc::new(|patterns: &[TestPattern]| patterns.to_vec())
}

/// Tuner that drops every pattern whose volume type is listed
pub fn exclude_vol_types(excluded: &[TestVolType]) -> PatternTuner {
    let excluded = excluded.to_vec();
    Arc::new(move |patterns: &[TestPattern]| {
        patterns
            .iter()
            .filter(|p| !excluded.contains(&p.vol_type()))
            .cloned()
            .collect()
    })
}

/// Tuner for CSI drivers that only provision dynamically
pub fn dynamic_only() -> PatternTuner {
    exclude_vol_types(&[TestVolType::InlineVolume, TestVolType::PreprovisionedPV])
}
