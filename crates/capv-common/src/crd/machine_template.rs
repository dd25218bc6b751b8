//! VSphereMachineTemplate, the infrastructure template referenced by
//! KubeadmControlPlanes and MachineDeployments.
//!
//! Only the placement fields cluster modules need are modelled.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind name owners must reference for cluster modules to apply
pub const VSPHERE_MACHINE_TEMPLATE_KIND: &str = "VSphereMachineTemplate";

/// Specification for a VSphereMachineTemplate
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereMachineTemplate",
    plural = "vspheremachinetemplates",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachineTemplateSpec {
    /// Machine template
    pub template: VSphereMachineTemplateResource,
}

/// Wrapper matching the Cluster API template layout
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachineTemplateResource {
    /// Machine spec stamped into every VSphereMachine
    pub spec: VSphereMachineSpec,
}

/// Placement of a VSphereMachine in vCenter
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachineSpec {
    /// vCenter the machines are cloned on
    #[serde(default)]
    pub server: String,

    /// Datacenter name or inventory path
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datacenter: String,

    /// Resource pool name or inventory path, e.g. `/DC0/host/C0/Resources`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_pool: String,

    /// Template VM to clone
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template: String,
}

impl VSphereMachineTemplate {
    /// vCenter server the template places machines on
    pub fn server(&self) -> &str {
        &self.spec.template.spec.server
    }

    /// Resource pool the template places machines in
    pub fn resource_pool(&self) -> &str {
        &self.spec.template.spec.resource_pool
    }
}
