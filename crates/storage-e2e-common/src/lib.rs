//! Common types for storage-e2e: errors, manifest parsing and kube-rs utilities

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every server-side apply issued by a run
pub const FIELD_MANAGER: &str = "storage-e2e";

/// Label key stamped on every namespace a run creates
pub const E2E_RUN_LABEL_KEY: &str = "storage-e2e.io/run";
