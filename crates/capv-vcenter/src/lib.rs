//! Minimal vCenter REST client for cluster module management
//!
//! Only the calls needed to manage cluster modules are implemented: session
//! login, appliance version, compute cluster lookup for a resource pool and
//! module create/list/delete.

#![deny(missing_docs)]

mod client;
mod error;
mod session;

use std::sync::Arc;

use async_trait::async_trait;
use capv_common::crd::VCenterVersion;

pub use client::{
    base_url, ClusterSummary, ModuleSummary, ResourcePoolSummary, VCenterClient, SESSION_HEADER,
};
pub use error::VCenterError;
pub use session::{SessionManager, SessionOptions, DEFAULT_REQUEST_TIMEOUT};

/// vCenter login credentials
#[derive(Clone)]
pub struct Credentials {
    /// User name, e.g. `administrator@vsphere.local`
    pub username: String,
    /// Password
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Owner of a resource pool
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComputeCluster {
    /// Pool belongs to this compute cluster
    Cluster(String),
    /// Pool is owned by something cluster modules cannot target
    Unsupported(String),
}

/// Cluster module operations against one vCenter
#[async_trait]
pub trait ModuleProvider: Send + Sync {
    /// vCenter API version
    async fn version(&self) -> Result<VCenterVersion, VCenterError>;

    /// Compute cluster owning `resource_pool`
    async fn compute_cluster(&self, resource_pool: &str) -> Result<ComputeCluster, VCenterError>;

    /// Create a module in `cluster` and return its id
    async fn create_module(&self, cluster: &str) -> Result<String, VCenterError>;

    /// Whether `module` exists in `cluster`
    async fn module_exists(&self, module: &str, cluster: &str) -> Result<bool, VCenterError>;

    /// Delete `module`; an already deleted module is not an error
    async fn delete_module(&self, module: &str) -> Result<(), VCenterError>;
}

/// Hands out a [`ModuleProvider`] for a vCenter server
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `server`, reusing a cached session when possible
    async fn connect(&self, server: &str) -> Result<Arc<dyn ModuleProvider>, VCenterError>;
}
