//! Entry point for one cluster module pass over a VSphereCluster

use std::sync::Arc;

use capv_common::crd::VSphereCluster;
use capv_common::Error;
use kube::ResourceExt;
use tracing::{info, instrument};

use crate::compat::is_cluster_compatible;
use crate::condition::ConditionUpdate;
use crate::engine::converge;
use crate::fetch::{fetch_owner_objects, OwnerStore};
use crate::service::ClusterModuleService;

/// Reconciles cluster modules for VSphereClusters
#[derive(Clone)]
pub struct ModuleReconciler {
    service: Arc<dyn ClusterModuleService>,
    store: Arc<dyn OwnerStore>,
}

impl ModuleReconciler {
    /// Build a reconciler from a module service and an owner store
    pub fn new(service: Arc<dyn ClusterModuleService>, store: Arc<dyn OwnerStore>) -> Self {
        Self { service, store }
    }

    /// Converge `spec.clusterModules` and the `ClusterModulesAvailable`
    /// condition in place
    ///
    /// The caller persists the object. Returns `Ok` when every failure was an
    /// incompatible owner; the condition still reports them.
    #[instrument(skip_all, fields(cluster = %cluster.name_any()))]
    pub async fn reconcile(&self, cluster: &mut VSphereCluster) -> Result<(), Error> {
        info!("Reconciling cluster modules");

        if !is_cluster_compatible(cluster) {
            let version = cluster.vcenter_version().cloned();
            info!(
                vcenter_version = %version.as_ref().map(|v| v.as_str()).unwrap_or_default(),
                "Cluster is not compatible for anti affinity (vCenter >= 7 required)"
            );
            ConditionUpdate::incompatible_version(version.as_ref()).apply(cluster.status_mut());
            return Ok(());
        }

        let owners = fetch_owner_objects(self.store.as_ref(), cluster).await?;
        let outcome = converge(self.service.as_ref(), cluster, owners).await;

        let result = outcome.result();
        ConditionUpdate::from_outcome(&outcome).apply(cluster.status_mut());
        cluster.spec.cluster_modules = outcome.modules;
        result
    }
}
