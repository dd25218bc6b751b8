//! Custom resources owned or read by the provider

mod capi;
mod machine_template;
mod types;
mod vsphere_cluster;

pub use capi::{
    Cluster, ClusterSpec, ClusterStatus, KubeadmControlPlane, KubeadmControlPlaneMachineTemplate,
    KubeadmControlPlaneSpec, MachineDeployment, MachineDeploymentSpec, MachineSpec,
    MachineTemplateSpec, CONTROL_PLANE_INITIALIZED_CONDITION,
};
pub use machine_template::{
    VSphereMachineSpec, VSphereMachineTemplate, VSphereMachineTemplateResource,
    VSphereMachineTemplateSpec, VSPHERE_MACHINE_TEMPLATE_KIND,
};
pub use types::{
    ApiEndpoint, Condition, ConditionSeverity, ConditionStatus, Conditions, ObjectReference,
};
pub use vsphere_cluster::{
    ClusterModule, VCenterVersion, VSphereCluster, VSphereClusterSpec, VSphereClusterStatus,
    CLUSTER_MODULES_AVAILABLE_CONDITION, CLUSTER_MODULE_SETUP_FAILED_REASON,
    MIN_CLUSTER_MODULE_MAJOR_VERSION, MISSING_VCENTER_VERSION_REASON, READY_CONDITION,
    VCENTER_AVAILABLE_CONDITION, VCENTER_UNREACHABLE_REASON, VCENTER_VERSION_INCOMPATIBLE_REASON,
};
