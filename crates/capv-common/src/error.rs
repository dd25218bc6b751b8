//! Error types for the vSphere provider
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the cluster it relates to where one is known.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for provider operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for a resource spec or metadata
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the VSphereCluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
    },

    /// vCenter API error
    #[error("vcenter error [{server}]: {message}")]
    VCenter {
        /// vCenter server address
        server: String,
        /// Description of what failed
        message: String,
    },

    /// More than one control plane object owns machines of the cluster
    #[error("multiple control plane objects found, expected 1, found {found}")]
    MultipleControlPlanes {
        /// Number of control plane objects found
        found: usize,
    },

    /// One or more cluster modules could not be reconciled
    ///
    /// The message is the same text written to the ClusterModulesAvailable
    /// condition.
    #[error("{message}")]
    ClusterModules {
        /// Aggregated per-owner failure message
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "poller")
        context: String,
    },
}

impl Error {
    /// Create a validation error without cluster context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error with cluster context
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a vCenter error for the given server
    pub fn vcenter(server: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::VCenter {
            server: server.into(),
            message: msg.into(),
        }
    }

    /// Create an aggregated cluster module error
    pub fn cluster_modules(msg: impl Into<String>) -> Self {
        Self::ClusterModules {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether a requeue can be expected to succeed without a spec change
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube { .. } => true,
            Self::VCenter { .. } => true,
            Self::ClusterModules { .. } => true,
            Self::Internal { .. } => true,
            Self::Validation { .. } => false,
            Self::MultipleControlPlanes { .. } => false,
            Self::Serialization { .. } => false,
        }
    }

    /// Cluster name associated with the error, if any
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Self::Validation { cluster, .. } if cluster != UNKNOWN_CONTEXT => Some(cluster),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
