//! Integration tests for storage-e2e
//!
//! These tests run the orchestration engine against a real (kind) cluster and
//! tell the story of how a driver author qualifies a CSI driver.
//!
//! # Test Organization
//!
//! - `csi_volumes`: Stories about installing the csi-hostpath driver, running
//!   the built-in suites against it and leaving nothing behind
//!
//! # Running These Tests
//!
//! ```bash
//! # Manifests laid out as driver-registrar/, external-attacher/,
//! # external-provisioner/ and hostpath/hostpath/
//! export STORAGE_E2E_MANIFEST_DIR=/path/to/manifests
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod csi_volumes;
mod helpers;
