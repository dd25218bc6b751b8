//! VSphereCluster controller implementation
//!
//! Reconciles VSphereCluster resources: finalizer handling, vCenter
//! connectivity and version, cluster modules for the cluster's control plane
//! and machine deployments, and the API-server-online poller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capv_clustermodule::{
    modules_equal, ClusterModuleService, KubeOwnerStore, ModuleReconciler, OwnerStore,
    VSphereModuleService,
};
use capv_common::crd::{
    Cluster, ClusterModule, Condition, ConditionSeverity, ConditionStatus, Conditions,
    VSphereCluster, VSphereClusterStatus, CLUSTER_MODULES_AVAILABLE_CONDITION,
    CLUSTER_MODULE_SETUP_FAILED_REASON, MISSING_VCENTER_VERSION_REASON,
    VCENTER_AVAILABLE_CONDITION, VCENTER_UNREACHABLE_REASON,
};
use capv_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use capv_common::kube_utils::{
    has_finalizer, has_paused_annotation, is_being_deleted, owner_cluster_name,
    patch_resource_status,
};
use capv_common::metrics::ReconcileTimer;
use capv_common::{Error, FIELD_MANAGER, VSPHERE_CLUSTER_FINALIZER};
use capv_vcenter::Connector;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::reflector::ObjectRef;
use kube::{Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, error, info, instrument, warn};

use crate::api_server::{ApiServerPollers, PollTarget};

/// Reporting component of Events emitted by this controller
pub const CONTROLLER_NAME: &str = "vspherecluster-controller";

/// Requeue delay after a failed reconcile
pub const ERROR_REQUEUE: Duration = Duration::from_secs(10);

/// Periodic resync so modules deleted out of band in vCenter are recreated
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(600);

/// Requeue delay after adding the finalizer
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Trait abstracting Kubernetes client operations for VSphereCluster
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a CAPI Cluster by namespace and name
    async fn get_capi_cluster(&self, namespace: &str, name: &str)
        -> Result<Option<Cluster>, Error>;

    /// Add a finalizer to a VSphereCluster
    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer from a VSphereCluster
    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Replace `spec.clusterModules` of a VSphereCluster
    async fn patch_cluster_modules(
        &self,
        namespace: &str,
        name: &str,
        modules: &[ClusterModule],
    ) -> Result<(), Error>;

    /// Patch the status of a VSphereCluster
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &VSphereClusterStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<VSphereCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.api(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_capi_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Cluster>, Error> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn add_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let cluster = self.api(namespace).get(name).await?;
        let mut finalizers = cluster.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        self.patch_finalizers(namespace, name, finalizers).await
    }

    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let cluster = match self.api(namespace).get(name).await {
            Ok(c) => c,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(cluster = %name, "VSphereCluster already gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let finalizers: Vec<String> = cluster
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();
        self.patch_finalizers(namespace, name, finalizers).await
    }

    async fn patch_cluster_modules(
        &self,
        namespace: &str,
        name: &str,
        modules: &[ClusterModule],
    ) -> Result<(), Error> {
        // An empty list must be sent explicitly to clear the field
        let patch = serde_json::json!({
            "spec": {
                "clusterModules": modules
            }
        });
        self.api(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &VSphereClusterStatus,
    ) -> Result<(), Error> {
        // Explicit fields so removed conditions and versions are cleared
        let status = serde_json::json!({
            "ready": status.ready,
            "conditions": status.conditions,
            "vCenterVersion": status.vcenter_version,
        });
        patch_resource_status::<VSphereCluster>(
            &self.client,
            name,
            namespace,
            &status,
            FIELD_MANAGER,
        )
        .await?;
        Ok(())
    }
}

/// Controller context containing shared state and clients
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client, connector, pollers)
///     .node_anti_affinity(true)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Cluster module pass
    pub modules: ModuleReconciler,
    /// vCenter sessions
    pub vcenter: Arc<dyn Connector>,
    /// Event publisher for VSphereCluster Events
    pub events: Arc<dyn EventPublisher>,
    /// Running API-server-online pollers
    pub pollers: Arc<ApiServerPollers>,
    /// The NodeAntiAffinity feature gate
    pub node_anti_affinity: bool,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(
        client: Client,
        vcenter: Arc<dyn Connector>,
        pollers: Arc<ApiServerPollers>,
    ) -> ContextBuilder {
        ContextBuilder::new(client, vcenter, pollers)
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        service: Arc<dyn ClusterModuleService>,
        owners: Arc<dyn OwnerStore>,
        vcenter: Arc<dyn Connector>,
        pollers: Arc<ApiServerPollers>,
    ) -> Self {
        Self {
            kube,
            modules: ModuleReconciler::new(service, owners),
            vcenter,
            events: Arc::new(capv_common::events::NoopEventPublisher),
            pollers,
            node_anti_affinity: true,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    vcenter: Arc<dyn Connector>,
    pollers: Arc<ApiServerPollers>,
    kube: Option<Arc<dyn KubeClient>>,
    owners: Option<Arc<dyn OwnerStore>>,
    service: Option<Arc<dyn ClusterModuleService>>,
    events: Option<Arc<dyn EventPublisher>>,
    node_anti_affinity: bool,
}

impl ContextBuilder {
    fn new(client: Client, vcenter: Arc<dyn Connector>, pollers: Arc<ApiServerPollers>) -> Self {
        Self {
            client,
            vcenter,
            pollers,
            kube: None,
            owners: None,
            service: None,
            events: None,
            node_anti_affinity: false,
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the owner object store
    pub fn owner_store(mut self, owners: Arc<dyn OwnerStore>) -> Self {
        self.owners = Some(owners);
        self
    }

    /// Override the cluster module service
    pub fn module_service(mut self, service: Arc<dyn ClusterModuleService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Enable cluster modules (the NodeAntiAffinity feature gate)
    pub fn node_anti_affinity(mut self, enabled: bool) -> Self {
        self.node_anti_affinity = enabled;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let owners = self
            .owners
            .unwrap_or_else(|| Arc::new(KubeOwnerStore::new(self.client.clone())));
        let service = self.service.unwrap_or_else(|| {
            Arc::new(VSphereModuleService::new(
                Arc::clone(&self.vcenter),
                Arc::clone(&owners),
            ))
        });

        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            modules: ModuleReconciler::new(service, owners),
            vcenter: self.vcenter,
            events: self.events.unwrap_or_else(|| {
                Arc::new(KubeEventPublisher::new(self.client.clone(), CONTROLLER_NAME))
            }),
            pollers: self.pollers,
            node_anti_affinity: self.node_anti_affinity,
        }
    }
}

/// Reconcile a VSphereCluster resource
///
/// The object is worked on as a copy. Whatever happens, changes to
/// `spec.clusterModules` and the status are patched back before returning.
#[instrument(skip(vsphere_cluster, ctx), fields(cluster = %vsphere_cluster.name_any()))]
pub async fn reconcile(
    vsphere_cluster: Arc<VSphereCluster>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let timer = ReconcileTimer::start();
    let result = reconcile_cluster(&vsphere_cluster, &ctx).await;
    match &result {
        Ok(_) => timer.success(),
        Err(_) => timer.error(),
    }
    result
}

/// Log the failure and requeue
pub fn error_policy(vsphere_cluster: Arc<VSphereCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cluster = %vsphere_cluster.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}

async fn reconcile_cluster(vsphere_cluster: &VSphereCluster, ctx: &Context) -> Result<Action, Error> {
    let name = vsphere_cluster.name_any();
    let namespace = vsphere_cluster
        .namespace()
        .ok_or_else(|| Error::validation_for(&name, "VSphereCluster has no namespace"))?;

    let cluster = match owner_cluster_name(vsphere_cluster) {
        Some(cluster_name) => ctx.kube.get_capi_cluster(&namespace, &cluster_name).await?,
        None => None,
    };

    if is_paused(vsphere_cluster, cluster.as_ref()) {
        debug!("VSphereCluster linked to a cluster that is paused");
        return Ok(Action::await_change());
    }

    if is_being_deleted(vsphere_cluster) {
        return reconcile_delete(vsphere_cluster, &namespace, ctx).await;
    }

    let Some(cluster) = cluster else {
        info!("Waiting for Cluster Controller to set OwnerRef on VSphereCluster");
        return Ok(Action::await_change());
    };

    if !has_finalizer(vsphere_cluster, VSPHERE_CLUSTER_FINALIZER) {
        info!("Adding finalizer");
        ctx.kube
            .add_finalizer(&namespace, &name, VSPHERE_CLUSTER_FINALIZER)
            .await?;
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    let mut working = vsphere_cluster.clone();
    let result = reconcile_normal(&mut working, &cluster, ctx).await;
    let persisted = persist(vsphere_cluster, &working, &namespace, ctx).await;
    publish_module_events(vsphere_cluster, &working, ctx).await;

    let action = result?;
    persisted?;
    Ok(action)
}

fn is_paused(vsphere_cluster: &VSphereCluster, cluster: Option<&Cluster>) -> bool {
    has_paused_annotation(vsphere_cluster)
        || cluster.is_some_and(|c| c.spec.paused || has_paused_annotation(c))
}

fn cluster_modules_enabled(vsphere_cluster: &VSphereCluster, ctx: &Context) -> bool {
    ctx.node_anti_affinity && !vsphere_cluster.cluster_modules_disabled()
}

async fn reconcile_normal(
    working: &mut VSphereCluster,
    cluster: &Cluster,
    ctx: &Context,
) -> Result<Action, Error> {
    info!("Reconciling VSphereCluster");

    let provider = match ctx.vcenter.connect(&working.spec.server).await {
        Ok(provider) => provider,
        Err(e) => {
            warn!(server = %working.spec.server, error = %e, "vCenter unreachable");
            working.status_mut().mark_false(
                VCENTER_AVAILABLE_CONDITION,
                VCENTER_UNREACHABLE_REASON,
                ConditionSeverity::Error,
                e.to_string(),
            );
            return Err(e.into());
        }
    };
    working.status_mut().mark_true(VCENTER_AVAILABLE_CONDITION);

    match provider.version().await {
        Ok(version) => working.status_mut().vcenter_version = Some(version),
        Err(e) => error!(error = %e, "could not reconcile vCenter version"),
    }
    if working.vcenter_version().map_or(true, |v| v.as_str().is_empty()) {
        working.status_mut().mark_false(
            CLUSTER_MODULES_AVAILABLE_CONDITION,
            MISSING_VCENTER_VERSION_REASON,
            ConditionSeverity::Warning,
            "vCenter API version not set",
        );
    }

    if cluster_modules_enabled(working, ctx) {
        if let Err(e) = ctx.modules.reconcile(working).await {
            working.status_mut().mark_false(
                CLUSTER_MODULES_AVAILABLE_CONDITION,
                CLUSTER_MODULE_SETUP_FAILED_REASON,
                ConditionSeverity::Warning,
                e.to_string(),
            );
            return Err(e);
        }
    }

    working.status_mut().ready = true;
    start_api_server_poller(working, cluster, ctx);
    Ok(Action::requeue(RESYNC_INTERVAL))
}

async fn reconcile_delete(
    vsphere_cluster: &VSphereCluster,
    namespace: &str,
    ctx: &Context,
) -> Result<Action, Error> {
    info!("Reconciling VSphereCluster delete");
    if !has_finalizer(vsphere_cluster, VSPHERE_CLUSTER_FINALIZER) {
        return Ok(Action::await_change());
    }

    // Modules go first: removing them needs the vCenter session
    if cluster_modules_enabled(vsphere_cluster, ctx) {
        let mut working = vsphere_cluster.clone();
        if let Err(e) = ctx.modules.reconcile(&mut working).await {
            working.status_mut().mark_false(
                CLUSTER_MODULES_AVAILABLE_CONDITION,
                CLUSTER_MODULE_SETUP_FAILED_REASON,
                ConditionSeverity::Warning,
                e.to_string(),
            );
            if let Err(pe) = persist(vsphere_cluster, &working, namespace, ctx).await {
                warn!(error = %pe, "failed to persist VSphereCluster during delete");
            }
            return Err(e);
        }
    }

    ctx.kube
        .remove_finalizer(
            namespace,
            &vsphere_cluster.name_any(),
            VSPHERE_CLUSTER_FINALIZER,
        )
        .await?;
    info!("Removed finalizer");
    Ok(Action::await_change())
}

/// Start the API-server-online poller unless the control plane is up
fn start_api_server_poller(vsphere_cluster: &VSphereCluster, cluster: &Cluster, ctx: &Context) {
    if cluster.control_plane_initialized() {
        debug!(reason = "controlPlaneInitialized", "Skipping reconcile when API server is online");
        return;
    }
    let Some(uid) = cluster.uid() else {
        warn!("CAPI Cluster has no UID, not polling API server");
        return;
    };
    let target = PollTarget {
        cluster_uid: uid,
        namespace: cluster.namespace().unwrap_or_default(),
        cluster_name: cluster.name_any(),
        vsphere_cluster: ObjectRef::from_obj(vsphere_cluster),
    };
    if !ctx.pollers.start(target) {
        debug!(reason = "alreadyPolling", "Skipping reconcile when API server is online");
    }
}

/// Patch back what the pass changed
async fn persist(
    original: &VSphereCluster,
    working: &VSphereCluster,
    namespace: &str,
    ctx: &Context,
) -> Result<(), Error> {
    let name = original.name_any();

    if !modules_equal(&original.spec.cluster_modules, &working.spec.cluster_modules) {
        ctx.kube
            .patch_cluster_modules(namespace, &name, &working.spec.cluster_modules)
            .await?;
        debug!(count = working.spec.cluster_modules.len(), "Patched cluster modules");
    }

    if let Some(status) = &working.status {
        if original.status.as_ref() != Some(status) {
            ctx.kube.patch_status(namespace, &name, status).await?;
        }
    }
    Ok(())
}

fn modules_condition(cluster: &VSphereCluster) -> Option<&Condition> {
    cluster
        .status
        .as_ref()?
        .get_condition(CLUSTER_MODULES_AVAILABLE_CONDITION)
}

/// Emit an Event when `ClusterModulesAvailable` changes state
async fn publish_module_events(original: &VSphereCluster, working: &VSphereCluster, ctx: &Context) {
    let Some(after) = modules_condition(working) else {
        return;
    };
    let unchanged = modules_condition(original)
        .is_some_and(|before| before.status == after.status && before.reason == after.reason);
    if unchanged {
        return;
    }

    let (type_, reason) = match after.status {
        ConditionStatus::True => (EventType::Normal, reasons::CLUSTER_MODULES_READY),
        _ => (EventType::Warning, after.reason.as_str()),
    };
    let note = (!after.message.is_empty()).then(|| after.message.clone());
    ctx.events
        .publish(
            &working.object_ref(&()),
            type_,
            reason,
            actions::RECONCILE,
            note,
        )
        .await;
}
