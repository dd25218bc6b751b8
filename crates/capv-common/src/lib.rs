//! Common types for the vSphere cluster module provider: CRDs, errors and
//! utilities shared by the controllers.

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of core Cluster API objects
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";

/// Label linking an object to its CAPI Cluster
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Annotation pausing reconciliation of a single object
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Finalizer guarding VSphereCluster cleanup
pub const VSPHERE_CLUSTER_FINALIZER: &str = "vspherecluster.infrastructure.cluster.x-k8s.io";

/// Field manager used for patches
pub const FIELD_MANAGER: &str = "capv-controller-manager";
