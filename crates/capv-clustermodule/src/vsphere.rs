//! [`ClusterModuleService`] backed by vCenter

use std::sync::Arc;

use async_trait::async_trait;
use capv_common::crd::{VSphereCluster, VSphereMachineTemplate, VSPHERE_MACHINE_TEMPLATE_KIND};
use capv_vcenter::{ComputeCluster, Connector, ModuleProvider};
use tracing::{debug, instrument};

use crate::fetch::OwnerStore;
use crate::owner::OwnerObject;
use crate::service::{ClusterModuleService, CreateOutcome, ModuleError};

/// Creates modules in the compute cluster owning the owner's resource pool
pub struct VSphereModuleService {
    connector: Arc<dyn Connector>,
    store: Arc<dyn OwnerStore>,
}

impl VSphereModuleService {
    /// Build the service from a vCenter connector and an object store
    pub fn new(connector: Arc<dyn Connector>, store: Arc<dyn OwnerStore>) -> Self {
        Self { connector, store }
    }

    async fn machine_template(
        &self,
        owner: &OwnerObject,
    ) -> Result<VSphereMachineTemplate, ModuleError> {
        let template_ref = owner.infrastructure_ref();
        let owner_ns = owner.namespace().unwrap_or_default();
        let namespace = template_ref.namespace.as_deref().unwrap_or(&owner_ns);
        let owner_id = format!("{}/{}", owner_ns, owner.name());

        self.store
            .get_machine_template(namespace, &template_ref.name)
            .await
            .map_err(|e| ModuleError::Template {
                owner: owner_id.clone(),
                message: e.to_string(),
            })?
            .ok_or_else(|| ModuleError::Template {
                owner: owner_id,
                message: format!(
                    "{} {}/{} not found",
                    VSPHERE_MACHINE_TEMPLATE_KIND, namespace, template_ref.name
                ),
            })
    }

    async fn compute_cluster(
        &self,
        template: &VSphereMachineTemplate,
    ) -> Result<(Arc<dyn ModuleProvider>, String), ModuleError> {
        let provider = self.connector.connect(template.server()).await?;
        match provider.compute_cluster(template.resource_pool()).await? {
            ComputeCluster::Cluster(id) => Ok((provider, id)),
            ComputeCluster::Unsupported(resource) => {
                Err(ModuleError::incompatible_owner(resource))
            }
        }
    }
}

#[async_trait]
impl ClusterModuleService for VSphereModuleService {
    #[instrument(skip_all, fields(kind = owner.kind(), owner = %owner.name()))]
    async fn create(
        &self,
        cluster: &VSphereCluster,
        owner: &OwnerObject,
    ) -> Result<CreateOutcome, ModuleError> {
        if owner.infrastructure_ref().kind != VSPHERE_MACHINE_TEMPLATE_KIND {
            // Heterogeneous cluster: machines are not VSphereMachines
            debug!("skipping module creation for object");
            return Ok(CreateOutcome::Skipped);
        }

        let template = self.machine_template(owner).await?;
        if template.server() != cluster.spec.server {
            debug!(
                server = template.server(),
                "skipping module creation for object since template uses a different server"
            );
            return Ok(CreateOutcome::Skipped);
        }

        let (provider, compute_cluster) = self.compute_cluster(&template).await?;
        let module = provider.create_module(&compute_cluster).await?;
        debug!(module = %module, compute_cluster = %compute_cluster, "created cluster module for object");
        Ok(CreateOutcome::Created(module))
    }

    #[instrument(skip_all, fields(kind = owner.kind(), owner = %owner.name(), module = module_uuid))]
    async fn does_exist(
        &self,
        _cluster: &VSphereCluster,
        owner: &OwnerObject,
        module_uuid: &str,
    ) -> Result<bool, ModuleError> {
        let template = self.machine_template(owner).await?;
        let (provider, compute_cluster) = self.compute_cluster(&template).await?;
        Ok(provider.module_exists(module_uuid, &compute_cluster).await?)
    }

    async fn remove(&self, cluster: &VSphereCluster, module_uuid: &str) -> Result<(), ModuleError> {
        let provider = self.connector.connect(&cluster.spec.server).await?;
        Ok(provider.delete_module(module_uuid).await?)
    }
}
