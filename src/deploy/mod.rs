//! Manifest patch & deploy engine
//!
//! Installs a driver's control plane from an ordered list of manifests. Each
//! document is patched and applied in order; the returned [`Teardown`] owns
//! exactly the objects that were applied, so a failed installation can still
//! be cleaned up.

pub mod manifests;
pub mod patch;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};

use storage_e2e_common::Error;

use crate::cluster::{AppliedObject, ClusterClient};
use crate::framework::Framework;

pub use manifests::{FileManifestStore, ManifestStore, StaticManifestStore};
pub use patch::{patch_csi_deployment, patch_item, PatchOptions};

/// Deletes the objects an installation applied
#[must_use = "a teardown that is never run leaks cluster objects"]
pub struct Teardown {
    client: Arc<dyn ClusterClient>,
    driver: String,
    objects: Vec<AppliedObject>,
}

impl std::fmt::Debug for Teardown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Teardown")
            .field("driver", &self.driver)
            .field("objects", &self.objects)
            .finish_non_exhaustive()
    }
}

impl Teardown {
    fn new(client: Arc<dyn ClusterClient>, driver: &str) -> Self {
        Self {
            client,
            driver: driver.to_string(),
            objects: Vec::new(),
        }
    }

    /// Objects that will be deleted, in apply order
    pub fn objects(&self) -> &[AppliedObject] {
        &self.objects
    }

    /// Delete every applied object in reverse apply order
    ///
    /// Every deletion is attempted; failures are logged and summarized in the
    /// returned error.
    pub async fn run(self) -> Result<(), Error> {
        info!(driver = %self.driver, objects = self.objects.len(), "tearing down driver manifests");
        let mut failed = 0;
        for object in self.objects.iter().rev() {
            match self.client.delete(object).await {
                Ok(()) => debug!(driver = %self.driver, object = %object, "deleted"),
                Err(e) => {
                    failed += 1;
                    error!(driver = %self.driver, object = %object, error = %e, "failed to delete");
                }
            }
        }
        if failed > 0 {
            return Err(Error::deploy(
                &self.driver,
                format!("failed to delete {} of {} objects", failed, self.objects.len()),
            ));
        }
        Ok(())
    }
}

/// Load, patch and apply manifests in order
///
/// Stops at the first failure. The teardown is returned in every case and
/// covers the documents applied before the failure. Errors are deploy errors,
/// which abort the whole driver.
pub async fn create_from_manifests<F>(
    framework: &Framework,
    store: &dyn ManifestStore,
    driver: &str,
    patch: F,
    paths: &[&str],
) -> (Teardown, Result<(), Error>)
where
    F: Fn(&mut Value) -> Result<(), Error> + Sync,
{
    let mut teardown = Teardown::new(framework.client_handle(), driver);
    let result = apply_all(framework, store, driver, &patch, paths, &mut teardown).await;
    match &result {
        Ok(()) => info!(
            driver = %driver,
            objects = teardown.objects.len(),
            "driver manifests applied"
        ),
        Err(e) => error!(
            driver = %driver,
            applied = teardown.objects.len(),
            error = %e,
            "driver installation failed"
        ),
    }
    (teardown, result)
}

async fn apply_all<F>(
    framework: &Framework,
    store: &dyn ManifestStore,
    driver: &str,
    patch: &F,
    paths: &[&str],
    teardown: &mut Teardown,
) -> Result<(), Error>
where
    F: Fn(&mut Value) -> Result<(), Error> + Sync,
{
    for path in paths {
        let documents = store
            .load(path)
            .map_err(|e| Error::deploy(driver, e.to_string()))?;
        debug!(driver = %driver, path = %path, documents = documents.len(), "loaded manifest");

        for mut document in documents {
            patch(&mut document).map_err(|e| Error::deploy(driver, format!("{}: {}", path, e)))?;
            let applied = framework
                .client()
                .apply(&document)
                .await
                .map_err(|e| Error::deploy(driver, format!("{}: {}", path, e)))?;
            debug!(driver = %driver, object = %applied, "applied");
            teardown.objects.push(applied);
        }
    }
    Ok(())
}
