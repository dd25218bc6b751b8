//! Owner objects: the Cluster API objects whose machines share a cluster
//! module.

use std::collections::BTreeMap;
use std::fmt;

use capv_common::crd::{ClusterModule, KubeadmControlPlane, MachineDeployment, ObjectReference};
use kube::ResourceExt;

/// Prefix separating the control plane key from machine deployment keys
pub const CONTROL_PLANE_KEY_PREFIX: &str = "kcp";

/// A live object whose machines get one cluster module
#[derive(Clone, Debug)]
pub enum OwnerObject {
    /// The cluster's KubeadmControlPlane
    ControlPlane(KubeadmControlPlane),
    /// One of the cluster's MachineDeployments
    MachineDeployment(MachineDeployment),
}

impl OwnerObject {
    /// Object name
    pub fn name(&self) -> String {
        match self {
            Self::ControlPlane(kcp) => kcp.name_any(),
            Self::MachineDeployment(md) => md.name_any(),
        }
    }

    /// Object namespace
    pub fn namespace(&self) -> Option<String> {
        match self {
            Self::ControlPlane(kcp) => kcp.namespace(),
            Self::MachineDeployment(md) => md.namespace(),
        }
    }

    /// Kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ControlPlane(_) => "KubeadmControlPlane",
            Self::MachineDeployment(_) => "MachineDeployment",
        }
    }

    /// Whether this owns control plane machines
    pub fn is_control_plane(&self) -> bool {
        matches!(self, Self::ControlPlane(_))
    }

    /// Whether the object has a deletion timestamp
    pub fn is_marked_for_deletion(&self) -> bool {
        match self {
            Self::ControlPlane(kcp) => kcp.metadata.deletion_timestamp.is_some(),
            Self::MachineDeployment(md) => md.metadata.deletion_timestamp.is_some(),
        }
    }

    /// Infrastructure template the owner stamps machines from
    pub fn infrastructure_ref(&self) -> &ObjectReference {
        match self {
            Self::ControlPlane(kcp) => &kcp.spec.machine_template.infrastructure_ref,
            Self::MachineDeployment(md) => &md.spec.template.spec.infrastructure_ref,
        }
    }

    /// Key of this owner in an [`OwnerMap`]
    pub fn key(&self) -> OwnerKey {
        OwnerKey::new(&self.name(), self.is_control_plane())
    }

    /// Tracked record for this owner with the given module id
    pub fn module(&self, module_uuid: impl Into<String>) -> ClusterModule {
        ClusterModule {
            control_plane: self.is_control_plane(),
            target_object_name: self.name(),
            module_uuid: module_uuid.into(),
        }
    }
}

impl From<KubeadmControlPlane> for OwnerObject {
    fn from(kcp: KubeadmControlPlane) -> Self {
        Self::ControlPlane(kcp)
    }
}

impl From<MachineDeployment> for OwnerObject {
    fn from(md: MachineDeployment) -> Self {
        Self::MachineDeployment(md)
    }
}

/// Identity of an owner within one cluster
///
/// A control plane and a machine deployment with the same name map to
/// different keys.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerKey(String);

impl OwnerKey {
    /// Key for an owner name and role
    pub fn new(name: &str, control_plane: bool) -> Self {
        if control_plane {
            Self(format!("{}{}", CONTROL_PLANE_KEY_PREFIX, name))
        } else {
            Self(name.to_string())
        }
    }

    /// Key of the owner a tracked record points at
    pub fn for_module(module: &ClusterModule) -> Self {
        Self::new(&module.target_object_name, module.control_plane)
    }

    /// The key string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Live owners of a cluster, keyed by [`OwnerKey`]
pub type OwnerMap = BTreeMap<OwnerKey, OwnerObject>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{control_plane, deleting, machine_deployment};

    #[test]
    fn control_plane_key_is_prefixed() {
        let kcp = OwnerObject::from(control_plane("prod"));
        let md = OwnerObject::from(machine_deployment("prod"));
        assert_eq!(kcp.key().as_str(), "kcpprod");
        assert_eq!(md.key().as_str(), "prod");
        assert_ne!(kcp.key(), md.key());
    }

    #[test]
    fn module_record_key_matches_owner_key() {
        let kcp = OwnerObject::from(control_plane("prod"));
        let record = kcp.module("uuid-1");
        assert!(record.control_plane);
        assert_eq!(record.target_object_name, "prod");
        assert_eq!(OwnerKey::for_module(&record), kcp.key());
    }

    #[test]
    fn deletion_marker() {
        let md = OwnerObject::from(machine_deployment("md-0"));
        assert!(!md.is_marked_for_deletion());
        let md = OwnerObject::from(deleting(machine_deployment("md-0")));
        assert!(md.is_marked_for_deletion());
        assert!(!md.is_control_plane());
        assert_eq!(md.kind(), "MachineDeployment");
    }

    #[test]
    fn infrastructure_ref_per_kind() {
        let kcp = OwnerObject::from(control_plane("cp"));
        let md = OwnerObject::from(machine_deployment("md"));
        assert_eq!(kcp.infrastructure_ref().name, "cp-template");
        assert_eq!(md.infrastructure_ref().name, "md-template");
    }
}
