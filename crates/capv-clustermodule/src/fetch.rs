//! Reading owner objects and machine templates from the management cluster

use async_trait::async_trait;
use capv_common::crd::{KubeadmControlPlane, MachineDeployment, VSphereCluster, VSphereMachineTemplate};
use capv_common::kube_utils::cluster_name_label;
use capv_common::{Error, CLUSTER_NAME_LABEL};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, warn};

use crate::owner::{OwnerMap, OwnerObject};

/// Read access to the objects cluster modules are derived from
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OwnerStore: Send + Sync {
    /// KubeadmControlPlanes labelled with `cluster_name`
    async fn list_control_planes(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<KubeadmControlPlane>, Error>;

    /// MachineDeployments labelled with `cluster_name`
    async fn list_machine_deployments(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<MachineDeployment>, Error>;

    /// A VSphereMachineTemplate, `None` if it does not exist
    async fn get_machine_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VSphereMachineTemplate>, Error>;
}

/// [`OwnerStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeOwnerStore {
    client: Client,
}

impl KubeOwnerStore {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn cluster_selector(cluster_name: &str) -> ListParams {
    ListParams::default().labels(&format!("{}={}", CLUSTER_NAME_LABEL, cluster_name))
}

#[async_trait]
impl OwnerStore for KubeOwnerStore {
    async fn list_control_planes(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<KubeadmControlPlane>, Error> {
        let api: Api<KubeadmControlPlane> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&cluster_selector(cluster_name)).await?.items)
    }

    async fn list_machine_deployments(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<MachineDeployment>, Error> {
        let api: Api<MachineDeployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&cluster_selector(cluster_name)).await?.items)
    }

    async fn get_machine_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VSphereMachineTemplate>, Error> {
        let api: Api<VSphereMachineTemplate> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

/// Live owners of `cluster` that are not being deleted
///
/// Fails before anything else happens when more than one control plane is
/// found.
pub async fn fetch_owner_objects(
    store: &dyn OwnerStore,
    cluster: &VSphereCluster,
) -> Result<OwnerMap, Error> {
    let Some(cluster_name) = cluster_name_label(cluster) else {
        return Err(Error::validation_for(
            cluster.name_any(),
            "missing CAPI cluster label",
        ));
    };
    let namespace = cluster.namespace().unwrap_or_default();

    let control_planes = store
        .list_control_planes(&namespace, cluster_name)
        .await
        .inspect_err(|e| warn!(error = %e, "failed to list control plane objects"))?;
    if control_planes.len() > 1 {
        return Err(Error::MultipleControlPlanes {
            found: control_planes.len(),
        });
    }

    let machine_deployments = store
        .list_machine_deployments(&namespace, cluster_name)
        .await
        .inspect_err(|e| warn!(error = %e, "failed to list machine deployment objects"))?;

    let owners: OwnerMap = control_planes
        .into_iter()
        .map(OwnerObject::from)
        .chain(machine_deployments.into_iter().map(OwnerObject::from))
        .filter(|owner| !owner.is_marked_for_deletion())
        .map(|owner| (owner.key(), owner))
        .collect();

    debug!(count = owners.len(), "Fetched owner objects");
    Ok(owners)
}
