//! VSphereCluster Custom Resource Definition
//!
//! Infrastructure counterpart of a Cluster API `Cluster`. Besides the vCenter
//! endpoint it tracks the cluster modules (vCenter anti-affinity groups)
//! created for the cluster's control plane and machine deployments.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApiEndpoint, Condition, Conditions};

/// Condition: every owner object has a verified cluster module
pub const CLUSTER_MODULES_AVAILABLE_CONDITION: &str = "ClusterModulesAvailable";
/// Condition: vCenter session could be established
pub const VCENTER_AVAILABLE_CONDITION: &str = "VCenterAvailable";
/// Condition: summary readiness of the VSphereCluster
pub const READY_CONDITION: &str = "Ready";

/// Reason: one or more cluster modules could not be created or verified
pub const CLUSTER_MODULE_SETUP_FAILED_REASON: &str = "ClusterModuleSetupFailed";
/// Reason: vCenter API version too old for cluster modules
pub const VCENTER_VERSION_INCOMPATIBLE_REASON: &str = "VCenterVersionIncompatible";
/// Reason: vCenter version could not be determined
pub const MISSING_VCENTER_VERSION_REASON: &str = "MissingVCenterVersion";
/// Reason: vCenter session could not be established
pub const VCENTER_UNREACHABLE_REASON: &str = "VCenterUnreachable";

/// Oldest vCenter major version that supports cluster modules
pub const MIN_CLUSTER_MODULE_MAJOR_VERSION: u32 = 7;

/// Specification for a VSphereCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereCluster",
    plural = "vsphereclusters",
    shortname = "vsc",
    status = "VSphereClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Server","type":"string","jsonPath":".spec.server"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterSpec {
    /// Address of the vCenter endpoint
    pub server: String,

    /// Colon-separated SHA-1 thumbprint of the vCenter certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbprint: Option<String>,

    /// Endpoint used to reach the workload control plane
    #[serde(default, skip_serializing_if = "ApiEndpoint::is_zero")]
    pub control_plane_endpoint: ApiEndpoint,

    /// Cluster modules created for the cluster's owner objects
    ///
    /// Rewritten as a whole on every reconcile.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_modules: Vec<ClusterModule>,

    /// Opt this cluster out of cluster modules even with NodeAntiAffinity on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_cluster_module: Option<bool>,
}

/// A vCenter cluster module tracked for one owner object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ClusterModule {
    /// The owner is the cluster's KubeadmControlPlane
    #[serde(default)]
    pub control_plane: bool,

    /// Name of the owner object
    pub target_object_name: String,

    /// vCenter identifier of the module
    #[serde(rename = "moduleUUID")]
    pub module_uuid: String,
}

/// Status for a VSphereCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterStatus {
    /// Infrastructure is ready for machines
    #[serde(default)]
    pub ready: bool,

    /// Cluster API style conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// API version reported by vCenter
    #[serde(
        default,
        rename = "vCenterVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub vcenter_version: Option<VCenterVersion>,
}

impl Conditions for VSphereClusterStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

/// API version string reported by vCenter, e.g. `7.0.3`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(transparent)]
pub struct VCenterVersion(pub String);

impl VCenterVersion {
    /// Wrap a version string
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// Leading numeric component, if the string starts with one
    pub fn major(&self) -> Option<u32> {
        self.0.split('.').next()?.trim().parse().ok()
    }

    /// Whether vCenter supports cluster modules
    pub fn supports_cluster_modules(&self) -> bool {
        self.major()
            .is_some_and(|major| major >= MIN_CLUSTER_MODULE_MAJOR_VERSION)
    }

    /// The raw version string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VCenterVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl VSphereCluster {
    /// Status, created empty on first access
    pub fn status_mut(&mut self) -> &mut VSphereClusterStatus {
        self.status.get_or_insert_with(Default::default)
    }

    /// Version reported by vCenter, if already recorded
    pub fn vcenter_version(&self) -> Option<&VCenterVersion> {
        self.status.as_ref()?.vcenter_version.as_ref()
    }

    /// Whether this cluster explicitly opted out of cluster modules
    pub fn cluster_modules_disabled(&self) -> bool {
        self.spec.disable_cluster_module.unwrap_or(false)
    }
}
