//! Per-driver test framework context
//!
//! A [`Framework`] owns the namespace a driver's scenarios run in. The
//! namespace name is the run-unique identifier every cluster-scoped name is
//! derived from, so two frameworks alive at the same time never produce
//! colliding driver, StorageClass or RBAC names.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use storage_e2e_common::Error;

use crate::cluster::ClusterClient;
use crate::config::RunConfig;

/// Namespace, client and configuration shared by one driver's scenarios
pub struct Framework {
    client: Arc<dyn ClusterClient>,
    config: Arc<RunConfig>,
    namespace: String,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl Framework {
    /// Create the test namespace and wrap it
    pub async fn create(
        client: Arc<dyn ClusterClient>,
        config: Arc<RunConfig>,
    ) -> Result<Self, Error> {
        let namespace = client.create_namespace(&config.namespace_base).await?;
        Ok(Self::for_namespace(client, config, namespace))
    }

    /// Wrap an existing namespace without touching the cluster
    pub fn for_namespace(
        client: Arc<dyn ClusterClient>,
        config: Arc<RunConfig>,
        namespace: impl Into<String>,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            client,
            config,
            namespace: namespace.into(),
            rng: Mutex::new(rng),
        }
    }

    /// Test namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Run-unique identifier; the namespace name
    pub fn unique_name(&self) -> &str {
        &self.namespace
    }

    /// Cluster client
    pub fn client(&self) -> &dyn ClusterClient {
        self.client.as_ref()
    }

    /// Shared handle to the cluster client
    pub fn client_handle(&self) -> Arc<dyn ClusterClient> {
        Arc::clone(&self.client)
    }

    /// Run configuration
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Make a cluster-scoped name unique to this framework
    pub fn patch_name(&self, name: &str) -> String {
        format!("{}-{}", name, self.unique_name())
    }

    /// Pick one ready, schedulable node uniformly at random
    pub async fn pick_node(&self) -> Result<String, Error> {
        let nodes = self.client.list_ready_schedulable_nodes().await?;
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| Error::internal_with_context("pick_node", "rng lock poisoned"))?;
        select_node(&nodes, &mut *rng)
            .cloned()
            .ok_or_else(|| Error::internal_with_context("pick_node", "no ready schedulable nodes"))
    }

    /// Delete the namespace if the run is configured to
    pub async fn destroy(&self) -> Result<(), Error> {
        if !self.config.delete_namespace {
            warn!(namespace = %self.namespace, "keeping test namespace");
            return Ok(());
        }
        info!(namespace = %self.namespace, "destroying test namespace");
        self.client.delete_namespace(&self.namespace).await
    }
}

/// Choose a node uniformly at random from `nodes`
pub fn select_node<'a, R: Rng + ?Sized>(nodes: &'a [String], rng: &mut R) -> Option<&'a String> {
    nodes.choose(rng)
}
