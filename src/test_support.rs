//! In-memory cluster and fake drivers/suites for unit tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, HostPathVolumeSource, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeClaimStatus, Pod, Volume,
};
use k8s_openapi::api::storage::v1::StorageClass;
use serde_json::Value;

use storage_e2e_common::kube_utils::ManifestMetadata;
use storage_e2e_common::Error;

use crate::capability::DriverInfo;
use crate::cluster::{AppliedObject, ClusterClient, PodPhase};
use crate::compat::Skip;
use crate::driver::{
    unique_driver_name, DriverFactory, DynamicPvTestDriver, PreprovisionedVolumeTestDriver,
    TestDriver, TestVolume,
};
use crate::framework::Framework;
use crate::pattern::{TestPattern, TestVolType};
use crate::storage_class::{fs_type_parameters, get_storage_class};
use crate::suite::{ScenarioContext, SuiteFactory, SuiteRequirements, TestSuite, TestSuiteInfo};

/// Everything the fake cluster has seen
#[derive(Debug, Clone, Default)]
pub struct FakeState {
    pub nodes: Vec<String>,
    pub namespaces: Vec<String>,
    pub deleted_namespaces: Vec<String>,
    pub applied: Vec<AppliedObject>,
    pub applied_documents: Vec<Value>,
    pub live: Vec<AppliedObject>,
    pub deleted: Vec<AppliedObject>,
    pub delete_attempts: usize,
    pub storage_classes: BTreeMap<String, StorageClass>,
    pub created_storage_classes: Vec<String>,
    pub deleted_storage_classes: Vec<String>,
    pub persistent_volumes: BTreeMap<String, PersistentVolume>,
    pub deleted_persistent_volumes: Vec<String>,
    pub claims: BTreeMap<(String, String), PersistentVolumeClaim>,
    pub deleted_claims: Vec<String>,
    pub pods: Vec<Pod>,
    pub fail_apply_of: Option<String>,
    pub fail_deletes: bool,
    pub fail_pods: bool,
    generated: usize,
}

/// `ClusterClient` backed by in-memory state
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        let state = FakeState {
            nodes: vec!["worker-0".into(), "worker-1".into(), "worker-2".into()],
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Reject applies of objects with this name
    pub fn failing_apply_of(self, name: &str) -> Self {
        self.lock().fail_apply_of = Some(name.to_string());
        self
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.lock().fail_deletes = fail;
    }

    pub fn fail_pods(&self, fail: bool) {
        self.lock().fail_pods = fail;
    }

    pub fn state(&self) -> FakeState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn delete_failure(what: &str) -> Error {
    Error::internal_with_context("fake-cluster", format!("delete of {} rejected", what))
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn apply(&self, document: &Value) -> Result<AppliedObject, Error> {
        let meta = ManifestMetadata::from_value(document)?;
        let mut state = self.lock();
        if state.fail_apply_of.as_deref() == Some(meta.name.as_str()) {
            return Err(Error::internal_with_context("apply", format!("{} rejected", meta)));
        }
        state.applied.push(meta.clone());
        state.applied_documents.push(document.clone());
        state.live.retain(|o| o != &meta);
        state.live.push(meta.clone());
        Ok(meta)
    }

    async fn delete(&self, object: &AppliedObject) -> Result<(), Error> {
        let mut state = self.lock();
        state.delete_attempts += 1;
        if state.fail_deletes {
            return Err(delete_failure(&object.to_string()));
        }
        state.live.retain(|o| o != object);
        state.deleted.push(object.clone());
        Ok(())
    }

    async fn create_namespace(&self, base_name: &str) -> Result<String, Error> {
        let mut state = self.lock();
        state.generated += 1;
        let name = format!("e2e-tests-{}-{:05}", base_name, state.generated);
        state.namespaces.push(name.clone());
        Ok(name)
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        let mut state = self.lock();
        state.namespaces.retain(|n| n != name);
        state.deleted_namespaces.push(name.to_string());
        Ok(())
    }

    async fn list_ready_schedulable_nodes(&self) -> Result<Vec<String>, Error> {
        Ok(self.lock().nodes.clone())
    }

    async fn create_storage_class(&self, class: &StorageClass) -> Result<StorageClass, Error> {
        let name = class.metadata.name.clone().unwrap_or_default();
        let mut state = self.lock();
        if state.storage_classes.contains_key(&name) {
            return Err(Error::internal_with_context(
                "create_storage_class",
                format!("storage class {} already exists", name),
            ));
        }
        state.storage_classes.insert(name.clone(), class.clone());
        state.created_storage_classes.push(name);
        Ok(class.clone())
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, Error> {
        Ok(self.lock().storage_classes.get(name).cloned())
    }

    async fn delete_storage_class(&self, name: &str) -> Result<(), Error> {
        let mut state = self.lock();
        state.delete_attempts += 1;
        if state.fail_deletes {
            return Err(delete_failure(name));
        }
        state.storage_classes.remove(name);
        state.deleted_storage_classes.push(name.to_string());
        Ok(())
    }

    async fn create_persistent_volume(
        &self,
        volume: &PersistentVolume,
    ) -> Result<PersistentVolume, Error> {
        let mut state = self.lock();
        state.generated += 1;
        let mut created = volume.clone();
        if created.metadata.name.is_none() {
            let prefix = created.metadata.generate_name.clone().unwrap_or_default();
            created.metadata.name = Some(format!("{}{:05}", prefix, state.generated));
        }
        let name = created.metadata.name.clone().unwrap_or_default();
        state.persistent_volumes.insert(name, created.clone());
        Ok(created)
    }

    async fn delete_persistent_volume(&self, name: &str) -> Result<(), Error> {
        let mut state = self.lock();
        state.delete_attempts += 1;
        if state.fail_deletes {
            return Err(delete_failure(name));
        }
        state.persistent_volumes.remove(name);
        state.deleted_persistent_volumes.push(name.to_string());
        Ok(())
    }

    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, Error> {
        let mut state = self.lock();
        state.generated += 1;
        let mut created = claim.clone();
        if created.metadata.name.is_none() {
            let prefix = created.metadata.generate_name.clone().unwrap_or_default();
            created.metadata.name = Some(format!("{}{:05}", prefix, state.generated));
        }
        created.metadata.namespace = Some(namespace.to_string());
        let name = created.metadata.name.clone().unwrap_or_default();
        state
            .claims
            .insert((namespace.to_string(), name), created.clone());
        Ok(created)
    }

    async fn wait_for_claim_bound(
        &self,
        namespace: &str,
        name: &str,
        _timeout: Duration,
    ) -> Result<PersistentVolumeClaim, Error> {
        let mut state = self.lock();
        let claim = state
            .claims
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| {
                Error::timeout("wait_for_claim_bound", format!("claim {} not found", name))
            })?;
        claim.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".to_string()),
            ..Default::default()
        });
        Ok(claim.clone())
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut state = self.lock();
        state.delete_attempts += 1;
        if state.fail_deletes {
            return Err(delete_failure(name));
        }
        state.claims.remove(&(namespace.to_string(), name.to_string()));
        state.deleted_claims.push(name.to_string());
        Ok(())
    }

    async fn run_pod_to_completion(
        &self,
        namespace: &str,
        pod: &Pod,
        _timeout: Duration,
    ) -> Result<PodPhase, Error> {
        let mut state = self.lock();
        let mut recorded = pod.clone();
        recorded.metadata.namespace = Some(namespace.to_string());
        state.pods.push(recorded);
        Ok(if state.fail_pods {
            PodPhase::Failed
        } else {
            PodPhase::Succeeded
        })
    }
}

/// Call counts shared between a fake driver and its test
#[derive(Debug, Default)]
pub struct DriverCounters {
    pub create_driver: AtomicUsize,
    pub cleanup_driver: AtomicUsize,
    pub create_volume: AtomicUsize,
    pub delete_volume: AtomicUsize,
}

impl DriverCounters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Configurable driver that records its lifecycle calls
#[derive(Clone)]
pub struct FakeDriver {
    pub info: DriverInfo,
    pub counters: Arc<DriverCounters>,
    pub dynamic: bool,
    pub preprovisioned: bool,
    pub fail_install: bool,
    pub missing_source: bool,
    pub scratch_source: bool,
    pub skip_reason: Option<String>,
}

impl FakeDriver {
    pub fn new(info: DriverInfo) -> Self {
        Self {
            info,
            counters: Arc::new(DriverCounters::default()),
            dynamic: true,
            preprovisioned: true,
            fail_install: false,
            missing_source: false,
            scratch_source: false,
            skip_reason: None,
        }
    }

    /// Factory producing clones that share this driver's counters
    pub fn factory(&self) -> DriverFactory {
        let template = self.clone();
        Arc::new(move || Box::new(template.clone()) as Box<dyn TestDriver>)
    }
}

#[async_trait]
impl TestDriver for FakeDriver {
    fn driver_info(&self) -> &DriverInfo {
        &self.info
    }

    fn skip_unsupported_test(&self, _pattern: &TestPattern) -> Option<Skip> {
        self.skip_reason.as_ref().map(Skip::new)
    }

    async fn create_driver(&mut self, framework: &Framework) -> Result<(), Error> {
        self.counters.create_driver.fetch_add(1, Ordering::SeqCst);
        if self.fail_install {
            return Err(Error::deploy(&self.info.name, "install rejected"));
        }
        let node = framework.pick_node().await?;
        self.info.config.client_node_name = Some(node.clone());
        self.info.config.server_node_name = Some(node);
        Ok(())
    }

    async fn cleanup_driver(&mut self) -> Result<(), Error> {
        self.counters.cleanup_driver.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_dynamic_pv(&self) -> Option<&dyn DynamicPvTestDriver> {
        self.dynamic.then_some(self as &dyn DynamicPvTestDriver)
    }

    fn as_preprovisioned(&self) -> Option<&dyn PreprovisionedVolumeTestDriver> {
        self.preprovisioned
            .then_some(self as &dyn PreprovisionedVolumeTestDriver)
    }
}

impl DynamicPvTestDriver for FakeDriver {
    fn dynamic_provision_storage_class(
        &self,
        framework: &Framework,
        fs_type: &str,
    ) -> StorageClass {
        let provisioner = unique_driver_name(&self.info, framework);
        let suffix = format!("{}-sc", provisioner);
        get_storage_class(
            &provisioner,
            fs_type_parameters(fs_type),
            None,
            framework.namespace(),
            &suffix,
        )
    }
}

#[async_trait]
impl PreprovisionedVolumeTestDriver for FakeDriver {
    async fn create_volume(
        &self,
        _framework: &Framework,
        vol_type: TestVolType,
    ) -> Result<TestVolume, Error> {
        let n = self.counters.create_volume.fetch_add(1, Ordering::SeqCst);
        let source = (!self.missing_source).then(|| {
            if self.scratch_source {
                Volume {
                    name: "test-volume".to_string(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                }
            } else {
                Volume {
                    name: "test-volume".to_string(),
                    host_path: Some(HostPathVolumeSource {
                        path: format!("/var/lib/e2e/{}-{}", self.info.name, n),
                        type_: Some("DirectoryOrCreate".to_string()),
                    }),
                    ..Default::default()
                }
            }
        });
        Ok(TestVolume {
            id: format!("{}-{:?}-{}", self.info.name, vol_type, n),
            source,
        })
    }

    async fn delete_volume(
        &self,
        _framework: &Framework,
        _vol_type: TestVolType,
        _volume: &TestVolume,
    ) -> Result<(), Error> {
        self.counters.delete_volume.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What a fake suite does when executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    Pass,
    Fail,
    Panic,
    ProvisionClaim,
    BreakDriver,
}

/// Suite that records executions
#[derive(Clone)]
pub struct FakeSuite {
    pub info: TestSuiteInfo,
    pub executed: Arc<AtomicUsize>,
    pub behavior: FakeBehavior,
}

impl FakeSuite {
    pub fn new(name: &str, patterns: Vec<TestPattern>) -> Self {
        Self {
            info: TestSuiteInfo {
                name: name.to_string(),
                feature_tag: String::new(),
                test_patterns: patterns,
                requirements: SuiteRequirements::default(),
            },
            executed: Arc::new(AtomicUsize::new(0)),
            behavior: FakeBehavior::Pass,
        }
    }

    pub fn factory(&self) -> SuiteFactory {
        let template = self.clone();
        Arc::new(move || Box::new(template.clone()) as Box<dyn TestSuite>)
    }

    pub fn executions(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestSuite for FakeSuite {
    fn info(&self) -> &TestSuiteInfo {
        &self.info
    }

    async fn execute(&self, ctx: &mut ScenarioContext<'_>) -> Result<(), Error> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            FakeBehavior::Pass => Ok(()),
            FakeBehavior::Fail => Err(Error::execution(&self.info.name, "assertion failed")),
            FakeBehavior::Panic => panic!("suite {} blew up", self.info.name),
            FakeBehavior::BreakDriver => Err(Error::deploy(
                &ctx.driver.driver_info().name,
                "plugin pod is crash looping",
            )),
            FakeBehavior::ProvisionClaim => {
                ctx.resource
                    .provision_claim(ctx.framework, crate::resource::VolumeMode::Filesystem)
                    .await?;
                Ok(())
            }
        }
    }
}
