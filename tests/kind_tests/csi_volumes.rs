//! Integration tests for the csi-hostpath driver
//!
//! These tests tell the story of qualifying a CSI driver: install it once,
//! run every applicable suite and pattern against it, and leave the cluster
//! the way it was found.

use std::sync::Arc;

use storage_e2e::driver::{CsiHostpathDriver, DriverFactory, TestDriver};
use storage_e2e::framework::Framework;
use storage_e2e::matrix::{MatrixRunner, ScenarioOutcome};
use storage_e2e::pattern::DEFAULT_FS_DYNAMIC_PV;
use storage_e2e::resource::{GenericVolumeTestResource, SetupOutcome, VolumeMode};
use storage_e2e::suite::builtin_suites;

use super::helpers::{cluster_client, ensure_test_cluster, kind_run_config};

fn hostpath() -> DriverFactory {
    Arc::new(|| Box::new(CsiHostpathDriver::new()) as Box<dyn TestDriver>)
}

// =============================================================================
// Matrix Stories
// =============================================================================

/// Story: A driver author runs the built-in suites against csi-hostpath
///
/// The driver is installed once and only dynamic patterns are registered.
/// Every scenario it can serve passes; the block-mode scenarios are skipped
/// because the driver does not declare block support.
#[tokio::test]
#[ignore = "requires kind cluster and manifests - run with: cargo test --test kind -- --ignored"]
async fn story_hostpath_driver_passes_builtin_suites() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let config = Arc::new(kind_run_config().expect("missing manifests"));

    let report = MatrixRunner::new(config, cluster_client(client))
        .with_driver(hostpath())
        .with_suites(builtin_suites())
        .register()
        .expect("registration should succeed")
        .run()
        .await;

    assert!(report.is_success(), "run failed: {:?}", report.results);
    assert!(report.inconsistencies.is_empty());
    assert!(report.passed() > 0);
    assert!(report
        .results
        .iter()
        .filter(|r| r.name.contains("volumeMode"))
        .all(|r| matches!(
            &r.outcome,
            ScenarioOutcome::Skipped(reason) if reason.contains("BlockVolume")
        )));
}

/// Story: Focusing a run on dynamic provisioning
///
/// A focus filter narrows the run to the dynamic provisioning scenarios; the
/// report only lists those.
#[tokio::test]
#[ignore = "requires kind cluster and manifests - run with: cargo test --test kind -- --ignored"]
async fn story_focused_run_only_reports_selected_scenarios() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let mut config = kind_run_config().expect("missing manifests");
    config.focus = vec!["provisioning".to_string()];

    let report = MatrixRunner::new(Arc::new(config), cluster_client(client))
        .with_driver(hostpath())
        .with_suites(builtin_suites())
        .register()
        .expect("registration should succeed")
        .run()
        .await;

    assert!(!report.results.is_empty());
    assert!(report.results.iter().all(|r| r.name.contains("provisioning")));
    assert!(report.is_success(), "run failed: {:?}", report.results);
}

// =============================================================================
// Lifecycle Stories
// =============================================================================

/// Story: One dynamic scenario, step by step
///
/// The driver is installed in a fresh namespace, a StorageClass is created
/// for it, a claim binds through that class, and teardown removes the claim
/// and the class before the driver and namespace go away.
#[tokio::test]
#[ignore = "requires kind cluster and manifests - run with: cargo test --test kind -- --ignored"]
async fn story_dynamic_scenario_releases_everything() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let config = Arc::new(kind_run_config().expect("missing manifests"));
    let cluster = cluster_client(client);

    let fw = Framework::create(Arc::clone(&cluster), config)
        .await
        .expect("failed to create namespace");
    let mut driver = CsiHostpathDriver::new();
    driver.create_driver(&fw).await.expect("driver install failed");

    let SetupOutcome::Ready(mut resource) =
        GenericVolumeTestResource::setup(&fw, &driver, &DEFAULT_FS_DYNAMIC_PV)
            .await
            .expect("setup failed")
    else {
        panic!("dynamic pattern should not be skipped for csi-hostpath");
    };
    let class = resource
        .storage_class_name()
        .expect("dynamic resource has a storage class")
        .to_string();
    assert!(cluster.get_storage_class(&class).await.unwrap().is_some());

    let claim = resource
        .provision_claim(&fw, VolumeMode::Filesystem)
        .await
        .expect("claim creation failed");
    let name = claim.metadata.name.clone().unwrap();
    cluster
        .wait_for_claim_bound(fw.namespace(), &name, fw.config().claim_timeout)
        .await
        .expect("claim never bound");

    resource.teardown(&fw, &driver).await.expect("teardown failed");
    assert!(cluster.get_storage_class(&class).await.unwrap().is_none());

    driver.cleanup_driver().await.expect("driver cleanup failed");
    fw.destroy().await.expect("namespace deletion failed");
}
