//! VSphereCluster controller
//!
//! Drives a VSphereCluster through its lifecycle: finalizer, vCenter session,
//! API version, cluster modules and readiness. While a cluster's control plane
//! is coming up, a background poller watches the workload API server and
//! requests one more reconcile once it answers.

#![deny(missing_docs)]

pub mod api_server;
pub mod controller;

pub use api_server::{
    ApiServerPollers, ApiServerProbe, KubeApiServerProbe, PollTarget, ReconcileTrigger,
};
pub use controller::{
    error_policy, reconcile, Context, ContextBuilder, KubeClient, KubeClientImpl,
    CONTROLLER_NAME, ERROR_REQUEUE, RESYNC_INTERVAL,
};
