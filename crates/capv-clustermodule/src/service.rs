//! Cluster module service contract and its error types

use std::fmt;

use async_trait::async_trait;
use capv_common::crd::VSphereCluster;
use capv_vcenter::VCenterError;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::owner::OwnerObject;

/// Result of asking the service to create a module
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A module was created with this id
    Created(String),
    /// The owner is not eligible (foreign template kind or other vCenter)
    Skipped,
}

/// Failure of a single service call
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The owner's resource pool is not inside a compute cluster
    #[error("{resource} is not compatible with cluster modules")]
    IncompatibleOwner {
        /// vCenter id of the offending resource
        resource: String,
    },

    /// vCenter call failed
    #[error(transparent)]
    VCenter(#[from] VCenterError),

    /// The owner's machine template could not be resolved
    #[error("error fetching machine template for {owner}: {message}")]
    Template {
        /// Owner namespace/name
        owner: String,
        /// Description of what failed
        message: String,
    },

    /// Kubernetes API call failed
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying error
        #[source]
        source: capv_common::Error,
    },

    /// A tracked module could not be verified
    #[error("failed to verify cluster module {module:?}: {source}")]
    Verify {
        /// Module id that was being verified
        module: String,
        /// Why verification failed
        #[source]
        source: Box<ModuleError>,
    },
}

impl ModuleError {
    /// Incompatible owner error for a vCenter resource
    pub fn incompatible_owner(resource: impl Into<String>) -> Self {
        Self::IncompatibleOwner {
            resource: resource.into(),
        }
    }

    /// Wrap a verification failure for `module`
    pub fn verify(module: impl Into<String>, source: ModuleError) -> Self {
        Self::Verify {
            module: module.into(),
            source: Box::new(source),
        }
    }

    /// Whether the owner can never get a module in its current placement
    ///
    /// Only direct creation failures count; wrapped verification errors do
    /// not.
    pub fn is_incompatible_owner(&self) -> bool {
        matches!(self, Self::IncompatibleOwner { .. })
    }
}

impl From<capv_common::Error> for ModuleError {
    fn from(source: capv_common::Error) -> Self {
        Self::Kube { source }
    }
}

/// Per-owner failures collected during one pass, in the order they happened
#[derive(Debug, Default)]
pub struct ModuleErrors(Vec<(String, ModuleError)>);

/// Prefix of the aggregated failure message
pub const MODULE_ERRORS_PREFIX: &str = "failed to create cluster modules for: ";

impl ModuleErrors {
    /// Record a failure for `owner`
    pub fn push(&mut self, owner: impl Into<String>, error: ModuleError) {
        self.0.push((owner.into(), error));
    }

    /// Whether nothing failed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of failures
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `(owner, error)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModuleError)> {
        self.0.iter().map(|(owner, err)| (owner.as_str(), err))
    }

    /// Failures caused by incompatible owners
    pub fn incompatible(&self) -> impl Iterator<Item = (&str, &ModuleError)> {
        self.iter().filter(|(_, err)| err.is_incompatible_owner())
    }

    /// Non-empty and every failure is an incompatible owner
    pub fn all_incompatible(&self) -> bool {
        !self.is_empty() && self.incompatible().count() == self.len()
    }

    /// `failed to create cluster modules for: <owner> <error>, ...`
    pub fn message(&self) -> String {
        let details: Vec<String> = self
            .iter()
            .map(|(owner, err)| format!("{} {}", owner, err))
            .collect();
        format!("{}{}", MODULE_ERRORS_PREFIX, details.join(", "))
    }
}

impl fmt::Display for ModuleErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Create, verify and remove cluster modules for owner objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterModuleService: Send + Sync {
    /// Create a module for `owner`, or skip an ineligible owner
    async fn create(
        &self,
        cluster: &VSphereCluster,
        owner: &OwnerObject,
    ) -> Result<CreateOutcome, ModuleError>;

    /// Whether `module_uuid` still exists for `owner`
    async fn does_exist(
        &self,
        cluster: &VSphereCluster,
        owner: &OwnerObject,
        module_uuid: &str,
    ) -> Result<bool, ModuleError>;

    /// Delete `module_uuid`
    async fn remove(&self, cluster: &VSphereCluster, module_uuid: &str) -> Result<(), ModuleError>;
}
