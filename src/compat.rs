//! Compatibility filter
//!
//! Decides whether a (driver, suite, pattern) triple is runnable. A skip is a
//! normal outcome with a reason, never an error, and is decided before any
//! cluster resource exists.

use std::fmt;

use crate::capability::DriverInfo;
use crate::driver::TestDriver;
use crate::pattern::TestPattern;
use crate::suite::{SuiteRequirements, TestSuite, TestSuiteInfo};

/// Why a combination is not applicable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
    reason: String,
}

impl Skip {
    /// Skip with a human-readable reason
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The reason text
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Capability checks shared by every suite
///
/// Pure function of the suite's declaration, the pattern and the driver's
/// capability flags.
pub fn check_capabilities(
    suite: &TestSuiteInfo,
    pattern: &TestPattern,
    driver: &DriverInfo,
) -> Option<Skip> {
    if !suite.test_patterns.contains(pattern) {
        return Some(Skip::new(format!(
            "Suite {:?} does not declare pattern {:?} - skipping",
            suite.name,
            pattern.to_string()
        )));
    }
    if pattern.vol_type().requires_persistence() && !driver.is_persistent {
        return Some(Skip::new(format!(
            "Driver {:?} does not provide persistency - skipping",
            driver.name
        )));
    }
    let SuiteRequirements { fs_group, block } = suite.requirements;
    if fs_group && !driver.is_fs_group_supported {
        return Some(Skip::new(format!(
            "Driver {:?} does not support FsGroup - skipping",
            driver.name
        )));
    }
    if block && !driver.is_block_supported {
        return Some(Skip::new(format!(
            "Driver {:?} does not support BlockVolume - skipping",
            driver.name
        )));
    }
    if !driver.supports_fs_type(pattern.fs_type()) {
        return Some(Skip::new(format!(
            "Driver {:?} does not support {:?} fs type - skipping",
            driver.name,
            pattern.fs_type()
        )));
    }
    None
}

/// Full skip decision for a scenario: shared checks, then the suite's own
/// check, then the driver's
pub fn skip_unsupported(
    suite: &dyn TestSuite,
    driver: &dyn TestDriver,
    pattern: &TestPattern,
) -> Option<Skip> {
    check_capabilities(suite.info(), pattern, driver.driver_info())
        .or_else(|| suite.skip_unsupported(pattern, driver))
        .or_else(|| driver.skip_unsupported_test(pattern))
}
