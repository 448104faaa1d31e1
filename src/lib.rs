//! storage-e2e - combinatorial end-to-end tests for Kubernetes storage drivers
//!
//! A run crosses every registered driver with every registered test suite and
//! every volume pattern the suite declares. Combinations a driver cannot
//! service are skipped before any cluster object exists; the rest get their
//! volumes, storage classes and claims created, exercised and torn down.
//!
//! # Modules
//!
//! - [`capability`] - What a driver declares it can do
//! - [`pattern`] - Volume attachment / filesystem combinations and tuners
//! - [`compat`] - Skip decisions for (suite, driver, pattern)
//! - [`storage_class`] - StorageClass construction
//! - [`cluster`] - Cluster access seam and its kube-rs implementation
//! - [`framework`] - Per-driver test namespace context
//! - [`resource`] - Per-scenario volume lifecycle
//! - [`deploy`] - Manifest loading, patching and installation
//! - [`driver`] - Driver contracts and the csi-hostpath driver
//! - [`suite`] - Suite contract and the built-in suites
//! - [`matrix`] - Scenario enumeration and execution
//! - [`config`] - Run configuration

#![deny(missing_docs)]

pub mod capability;
pub mod cluster;
pub mod compat;
pub mod config;
pub mod deploy;
pub mod driver;
pub mod framework;
pub mod matrix;
pub mod pattern;
pub mod resource;
pub mod storage_class;
pub mod suite;

#[cfg(test)]
pub(crate) mod test_support;

pub use storage_e2e_common::{Error, Result};
