//! Manifest sources
//!
//! Drivers name their manifests by relative path; a [`ManifestStore`] turns a
//! path into parsed documents. The filesystem store is used for real runs, the
//! static store for tests and for drivers that embed their manifests.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;

use storage_e2e_common::yaml::parse_documents;
use storage_e2e_common::Error;

/// Source of raw manifest files
pub trait ManifestStore: Send + Sync {
    /// Raw contents of the manifest at `path`
    fn read(&self, path: &str) -> Result<String, Error>;

    /// Parsed, non-empty documents of the manifest at `path`, in file order
    fn load(&self, path: &str) -> Result<Vec<Value>, Error> {
        let raw = self.read(path)?;
        parse_documents(&raw).map_err(|e| Error::manifest(path, e.to_string()))
    }
}

/// Manifests read from a directory on disk
#[derive(Debug, Clone)]
pub struct FileManifestStore {
    root: PathBuf,
}

impl FileManifestStore {
    /// Store rooted at `root`; paths are resolved relative to it
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ManifestStore for FileManifestStore {
    fn read(&self, path: &str) -> Result<String, Error> {
        let full = self.root.join(path);
        std::fs::read_to_string(&full)
            .map_err(|e| Error::manifest(full.display().to_string(), e.to_string()))
    }
}

/// Manifests held in memory, keyed by path
#[derive(Debug, Clone, Default)]
pub struct StaticManifestStore {
    files: BTreeMap<String, String>,
}

impl StaticManifestStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the manifest at `path`
    pub fn with(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }
}

impl ManifestStore for StaticManifestStore {
    fn read(&self, path: &str) -> Result<String, Error> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::manifest(path, "no such manifest"))
    }
}
