//! Cluster client seam
//!
//! Everything the orchestration core needs from a cluster goes through
//! [`ClusterClient`], so the matrix, resource manager and deploy engine can be
//! exercised without an API server. [`KubeClusterClient`] is the kube-rs
//! implementation used for real runs.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams,
};
use kube::discovery::{ApiResource, Discovery};
use kube::Client;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use storage_e2e_common::kube_utils::{
    build_api_resource, is_node_ready_and_schedulable, is_not_found, parse_api_version,
    poll_until, ManifestMetadata,
};
use storage_e2e_common::{Error, E2E_RUN_LABEL_KEY, FIELD_MANAGER};

/// An object the deploy engine applied and must later delete
pub type AppliedObject = ManifestMetadata;

/// Interval between status polls while waiting on cluster-side state
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Prefix for generated test namespaces
pub const NAMESPACE_PREFIX: &str = "e2e-tests";

/// Terminal phase of a run-to-completion pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    /// All containers exited zero
    Succeeded,
    /// At least one container exited non-zero
    Failed,
}

/// Operations the orchestration core performs against a cluster
///
/// Deletes are idempotent: deleting something that is already gone succeeds.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Server-side apply one manifest document
    async fn apply(&self, document: &Value) -> Result<AppliedObject, Error>;

    /// Delete an object previously returned by [`ClusterClient::apply`]
    async fn delete(&self, object: &AppliedObject) -> Result<(), Error>;

    /// Create a namespace with a server-generated unique name
    ///
    /// Returns the generated name.
    async fn create_namespace(&self, base_name: &str) -> Result<String, Error>;

    /// Delete a namespace
    async fn delete_namespace(&self, name: &str) -> Result<(), Error>;

    /// Names of nodes that are Ready and accept new pods
    async fn list_ready_schedulable_nodes(&self) -> Result<Vec<String>, Error>;

    /// Create a StorageClass
    async fn create_storage_class(&self, class: &StorageClass) -> Result<StorageClass, Error>;

    /// Fetch a StorageClass by name
    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, Error>;

    /// Delete a StorageClass by name
    async fn delete_storage_class(&self, name: &str) -> Result<(), Error>;

    /// Create a PersistentVolume
    async fn create_persistent_volume(
        &self,
        volume: &PersistentVolume,
    ) -> Result<PersistentVolume, Error>;

    /// Delete a PersistentVolume by name
    async fn delete_persistent_volume(&self, name: &str) -> Result<(), Error>;

    /// Create a PersistentVolumeClaim
    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, Error>;

    /// Wait until a claim is Bound and return it
    async fn wait_for_claim_bound(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<PersistentVolumeClaim, Error>;

    /// Delete a PersistentVolumeClaim
    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Create a pod, wait for it to terminate, delete it and report its phase
    async fn run_pod_to_completion(
        &self,
        namespace: &str,
        pod: &Pod,
        timeout: Duration,
    ) -> Result<PodPhase, Error>;
}

/// kube-rs backed cluster client
pub struct KubeClusterClient {
    client: Client,
    discovery: OnceCell<Discovery>,
}

impl KubeClusterClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovery: OnceCell::new(),
        }
    }

    /// Resolve the API resource for a document, preferring discovery
    ///
    /// Falls back to naive pluralization when discovery does not know the
    /// kind (e.g. a CRD applied earlier in the same run).
    async fn api_resource(&self, meta: &AppliedObject) -> Result<ApiResource, Error> {
        let discovery = self
            .discovery
            .get_or_try_init(|| async {
                Discovery::new(self.client.clone())
                    .run()
                    .await
                    .map_err(|e| Error::internal_with_context("api-discovery", e.to_string()))
            })
            .await?;

        let (group, version) = parse_api_version(&meta.api_version);
        let gvk = GroupVersionKind {
            group,
            version,
            kind: meta.kind.clone(),
        };
        match discovery.resolve_gvk(&gvk) {
            Some((ar, _caps)) => Ok(ar),
            None => {
                debug!(
                    kind = %meta.kind,
                    api_version = %meta.api_version,
                    "kind not in discovery, using fallback pluralization"
                );
                Ok(build_api_resource(&meta.api_version, &meta.kind))
            }
        }
    }

    async fn dynamic_api(&self, meta: &AppliedObject) -> Result<Api<DynamicObject>, Error> {
        let ar = self.api_resource(meta).await?;
        Ok(match &meta.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        })
    }
}

/// Map a delete result onto the idempotent contract
fn ignore_not_found<T>(result: Result<T, kube::Error>) -> Result<(), Error> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn apply(&self, document: &Value) -> Result<AppliedObject, Error> {
        let meta = ManifestMetadata::from_value(document)?;
        let api = self.dynamic_api(&meta).await?;
        let params = PatchParams::apply(FIELD_MANAGER).force();

        api.patch(&meta.name, &params, &Patch::Apply(document))
            .await
            .map_err(|e| {
                Error::internal_with_context("apply", format!("failed to apply {}: {}", meta, e))
            })?;

        debug!(object = %meta, "applied manifest");
        Ok(meta)
    }

    async fn delete(&self, object: &AppliedObject) -> Result<(), Error> {
        let api = self.dynamic_api(object).await?;
        ignore_not_found(api.delete(&object.name, &DeleteParams::background()).await)?;
        debug!(object = %object, "deleted object");
        Ok(())
    }

    async fn create_namespace(&self, base_name: &str) -> Result<String, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-{}-", NAMESPACE_PREFIX, base_name)),
                labels: Some(BTreeMap::from([(
                    E2E_RUN_LABEL_KEY.to_string(),
                    base_name.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };

        let created = api.create(&PostParams::default(), &ns).await?;
        let name = created.metadata.name.ok_or_else(|| {
            Error::internal_with_context("create_namespace", "server returned no namespace name")
        })?;
        info!(namespace = %name, "created test namespace");
        Ok(name)
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        ignore_not_found(api.delete(name, &DeleteParams::background()).await)?;
        info!(namespace = %name, "deleted test namespace");
        Ok(())
    }

    async fn list_ready_schedulable_nodes(&self) -> Result<Vec<String>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;
        let mut names: Vec<String> = nodes
            .items
            .iter()
            .filter(|node| is_node_ready_and_schedulable(node))
            .filter_map(|node| node.metadata.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn create_storage_class(&self, class: &StorageClass) -> Result<StorageClass, Error> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), class).await?)
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, Error> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn delete_storage_class(&self, name: &str) -> Result<(), Error> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn create_persistent_volume(
        &self,
        volume: &PersistentVolume,
    ) -> Result<PersistentVolume, Error> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), volume).await?)
    }

    async fn delete_persistent_volume(&self, name: &str) -> Result<(), Error> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), claim).await?)
    }

    async fn wait_for_claim_bound(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<PersistentVolumeClaim, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);

        poll_until(
            timeout,
            POLL_INTERVAL,
            format!("claim {}/{} was not bound within {:?}", namespace, name, timeout),
            || {
                let api = api.clone();
                async move {
                    let claim = api.get(name).await?;
                    let phase = claim.status.as_ref().and_then(|s| s.phase.as_deref());
                    Ok::<_, Error>(phase == Some("Bound"))
                }
            },
        )
        .await?;

        Ok(api.get(name).await?)
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn run_pod_to_completion(
        &self,
        namespace: &str,
        pod: &Pod,
        timeout: Duration,
    ) -> Result<PodPhase, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let created = api.create(&PostParams::default(), pod).await?;
        let name = created.metadata.name.unwrap_or_default();

        let observed = std::sync::Mutex::new(None);
        let waited = poll_until(
            timeout,
            POLL_INTERVAL,
            format!("pod {}/{} did not terminate within {:?}", namespace, name, timeout),
            || {
                let api = api.clone();
                let name = name.clone();
                let observed = &observed;
                async move {
                    let pod = api.get(&name).await?;
                    let phase = match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
                        Some("Succeeded") => Some(PodPhase::Succeeded),
                        Some("Failed") => Some(PodPhase::Failed),
                        _ => None,
                    };
                    if let Ok(mut slot) = observed.lock() {
                        *slot = phase;
                    }
                    Ok::<_, Error>(phase.is_some())
                }
            },
        )
        .await;

        if let Err(e) = ignore_not_found(api.delete(&name, &DeleteParams::default()).await) {
            warn!(pod = %name, namespace = %namespace, error = %e, "failed to delete test pod");
        }

        waited?;
        observed.into_inner().ok().flatten().ok_or_else(|| {
            Error::internal_with_context("run_pod_to_completion", "pod phase was never observed")
        })
    }
}
