//! Cluster module reconciliation for vSphere clusters
//!
//! A cluster module is a vCenter anti-affinity group. Every KubeadmControlPlane
//! and MachineDeployment of a cluster gets one, so vCenter spreads their
//! machines across hosts. This crate keeps `VSphereCluster.spec.clusterModules`
//! in line with the live owner objects and reports the result on the
//! `ClusterModulesAvailable` condition.
//!
//! Related crates:
//! - `capv-vcenter`: vCenter REST client the module service talks to
//! - `capv-cluster`: VSphereCluster controller that drives [`ModuleReconciler`]

#![deny(missing_docs)]

pub mod compat;
pub mod condition;
pub mod engine;
pub mod fetch;
pub mod owner;
pub mod reconciler;
pub mod service;
pub mod vsphere;

#[cfg(test)]
pub(crate) mod testing;

pub use compat::{is_cluster_compatible, modules_equal};
pub use condition::ConditionUpdate;
pub use engine::{converge, ModulePassOutcome};
pub use fetch::{fetch_owner_objects, KubeOwnerStore, OwnerStore};
pub use owner::{OwnerKey, OwnerMap, OwnerObject, CONTROL_PLANE_KEY_PREFIX};
pub use reconciler::ModuleReconciler;
pub use service::{
    ClusterModuleService, CreateOutcome, ModuleError, ModuleErrors, MODULE_ERRORS_PREFIX,
};
pub use vsphere::VSphereModuleService;

pub use capv_common::{Error, Result};
