//! Kubernetes helpers shared by the controllers

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource, ResourceExt};
use tracing::trace;

use crate::{Error, CAPI_GROUP, CLUSTER_NAME_LABEL, PAUSED_ANNOTATION};

/// Connect timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a client from an optional kubeconfig path, inferring otherwise
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            config_from_kubeconfig(kubeconfig).await?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    client_from_config(config)
}

/// Create a client for a workload cluster from raw kubeconfig YAML
///
/// Uses short timeouts since the caller polls.
pub async fn client_from_kubeconfig_yaml(yaml: &str, timeout: Duration) -> Result<Client, Error> {
    let kubeconfig = Kubeconfig::from_yaml(yaml).map_err(|e| {
        Error::internal_with_context(
            "workload_client",
            format!("failed to parse kubeconfig: {}", e),
        )
    })?;
    let mut config = config_from_kubeconfig(kubeconfig).await?;
    config.connect_timeout = Some(timeout);
    config.read_timeout = Some(timeout);
    client_from_config(config)
}

async fn config_from_kubeconfig(kubeconfig: Kubeconfig) -> Result<Config, Error> {
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to load kubeconfig: {}", e),
            )
        })
}

fn client_from_config(config: Config) -> Result<Client, Error> {
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Poll `check_fn` every `poll_interval` until it returns `Ok(true)`
///
/// Errors from `check_fn` are treated as "not yet". Fails once `timeout` has
/// elapsed.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = std::time::Instant::now();
    let timeout_msg = timeout_msg.into();

    loop {
        if start.elapsed() > timeout {
            return Err(Error::internal_with_context("poll_until", timeout_msg));
        }

        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!("Polling condition not yet met"),
            Err(e) => trace!(error = %e, "Polling check failed, retrying"),
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Merge-patch the status subresource of a namespaced object
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
    field_manager: &str,
) -> Result<(), kube::Error>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Name of the owning CAPI `Cluster` from the object's ownerReferences
pub fn owner_cluster_name<K: Resource>(obj: &K) -> Option<String> {
    obj.owner_references()
        .iter()
        .find(|r| r.kind == "Cluster" && r.api_version.split('/').next() == Some(CAPI_GROUP))
        .map(|r| r.name.clone())
}

/// Value of the `cluster.x-k8s.io/cluster-name` label
pub fn cluster_name_label<K: ResourceExt>(obj: &K) -> Option<&str> {
    obj.labels().get(CLUSTER_NAME_LABEL).map(String::as_str)
}

/// Whether the object carries the Cluster API paused annotation
pub fn has_paused_annotation<K: ResourceExt>(obj: &K) -> bool {
    obj.annotations().contains_key(PAUSED_ANNOTATION)
}

/// Whether the object is being deleted
pub fn is_being_deleted<K: ResourceExt>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

/// Whether the object carries `finalizer`
pub fn has_finalizer<K: ResourceExt>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{VSphereCluster, VSphereClusterSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};

    fn cluster() -> VSphereCluster {
        VSphereCluster::new("prod", VSphereClusterSpec::default())
    }

    #[test]
    fn owner_cluster_requires_capi_group() {
        let mut c = cluster();
        c.metadata.owner_references = Some(vec![
            OwnerReference {
                api_version: "example.com/v1".to_string(),
                kind: "Cluster".to_string(),
                name: "other".to_string(),
                uid: "1".to_string(),
                ..Default::default()
            },
            OwnerReference {
                api_version: "cluster.x-k8s.io/v1beta1".to_string(),
                kind: "Cluster".to_string(),
                name: "prod".to_string(),
                uid: "2".to_string(),
                ..Default::default()
            },
        ]);
        assert_eq!(owner_cluster_name(&c), Some("prod".to_string()));
    }

    #[test]
    fn no_owner_references() {
        assert_eq!(owner_cluster_name(&cluster()), None);
    }

    #[test]
    fn labels_and_annotations() {
        let mut c = cluster();
        assert_eq!(cluster_name_label(&c), None);
        assert!(!has_paused_annotation(&c));

        c.labels_mut()
            .insert(CLUSTER_NAME_LABEL.to_string(), "prod".to_string());
        c.annotations_mut()
            .insert(PAUSED_ANNOTATION.to_string(), String::new());
        assert_eq!(cluster_name_label(&c), Some("prod"));
        assert!(has_paused_annotation(&c));
    }

    #[test]
    fn deletion_and_finalizers() {
        let mut c = cluster();
        assert!(!is_being_deleted(&c));
        assert!(!has_finalizer(&c, "f"));

        c.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        c.metadata.finalizers = Some(vec!["f".to_string()]);
        assert!(is_being_deleted(&c));
        assert!(has_finalizer(&c, "f"));
    }

    #[tokio::test]
    async fn poll_until_returns_when_ready() {
        let mut calls = 0;
        let result = poll_until(
            Duration::from_secs(5),
            Duration::from_millis(1),
            "never ready",
            || {
                calls += 1;
                let done = calls >= 3;
                async move { Ok(done) }
            },
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn poll_until_times_out() {
        let result = poll_until(
            Duration::from_millis(10),
            Duration::from_millis(2),
            "never ready",
            || async { Err(Error::internal("down")) },
        )
        .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("never ready"));
    }
}
