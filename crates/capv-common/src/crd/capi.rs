//! Cluster API objects read by the provider.
//!
//! These are not installed by this operator; they are declared as kube
//! resources so they can be listed and watched with typed clients. Unknown
//! fields are ignored on deserialization.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApiEndpoint, Condition, Conditions, ObjectReference};

/// Condition set on the CAPI Cluster once the first control plane node is up
pub const CONTROL_PLANE_INITIALIZED_CONDITION: &str = "ControlPlaneInitialized";

/// Cluster API Cluster spec (subset)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Reconciliation of the whole cluster is paused
    #[serde(default)]
    pub paused: bool,

    /// Endpoint of the workload API server
    #[serde(default, skip_serializing_if = "ApiEndpoint::is_zero")]
    pub control_plane_endpoint: ApiEndpoint,

    /// The VSphereCluster backing this cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

/// Cluster API Cluster status (subset)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Cluster API conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Conditions for ClusterStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl Cluster {
    /// Whether the first control plane machine has joined
    pub fn control_plane_initialized(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.is_condition_true(CONTROL_PLANE_INITIALIZED_CONDITION))
    }
}

/// MachineDeployment spec (subset)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachineDeployment",
    plural = "machinedeployments",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    /// Owning cluster
    #[serde(default)]
    pub cluster_name: String,

    /// Machine template
    #[serde(default)]
    pub template: MachineTemplateSpec,
}

/// Template machines of a MachineDeployment are stamped from
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateSpec {
    /// Machine spec
    #[serde(default)]
    pub spec: MachineSpec,
}

/// Machine spec (subset)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Infrastructure machine template
    #[serde(default)]
    pub infrastructure_ref: ObjectReference,
}

/// KubeadmControlPlane spec (subset)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "controlplane.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "KubeadmControlPlane",
    plural = "kubeadmcontrolplanes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmControlPlaneSpec {
    /// Desired control plane replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Template for control plane machines
    #[serde(default)]
    pub machine_template: KubeadmControlPlaneMachineTemplate,
}

/// Control plane machine template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmControlPlaneMachineTemplate {
    /// Infrastructure machine template
    #[serde(default)]
    pub infrastructure_ref: ObjectReference,
}
