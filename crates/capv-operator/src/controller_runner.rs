//! Wiring of the VSphereCluster controller and its watches

use std::sync::Arc;

use capv_cluster::{error_policy, reconcile, Context};
use capv_common::crd::{KubeadmControlPlane, MachineDeployment, VSphereCluster};
use capv_common::kube_utils::{cluster_name_label, owner_cluster_name};
use futures::StreamExt;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

/// Watch timeout in seconds, below the client read timeout so idle watches
/// are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// VSphereClusters in `namespace` belonging to the CAPI Cluster `cluster_name`
///
/// Matched by the cluster-name label or, before that is set, by the Cluster
/// owner reference.
pub fn vsphere_clusters_for(
    clusters: &[Arc<VSphereCluster>],
    namespace: Option<&str>,
    cluster_name: &str,
) -> Vec<ObjectRef<VSphereCluster>> {
    clusters
        .iter()
        .filter(|vsc| vsc.namespace().as_deref() == namespace)
        .filter(|vsc| {
            cluster_name_label(vsc.as_ref()) == Some(cluster_name)
                || owner_cluster_name(vsc.as_ref()).as_deref() == Some(cluster_name)
        })
        .map(|vsc| ObjectRef::from_obj(vsc.as_ref()))
        .collect()
}

fn mapper<K: ResourceExt>(
    store: Store<VSphereCluster>,
) -> impl Fn(K) -> Vec<ObjectRef<VSphereCluster>> + Send + Sync + 'static {
    move |obj: K| {
        let Some(cluster_name) = cluster_name_label(&obj) else {
            return Vec::new();
        };
        let refs = vsphere_clusters_for(&store.state(), obj.namespace().as_deref(), cluster_name);
        debug!(
            owner = %obj.name_any(),
            cluster = %cluster_name,
            matched = refs.len(),
            "Mapped owner object to VSphereClusters"
        );
        refs
    }
}

/// Run the VSphereCluster controller until a shutdown signal
///
/// Besides VSphereCluster changes, reconciles are triggered by changes to the
/// cluster's KubeadmControlPlanes and MachineDeployments and by the API
/// server pollers through `triggers`.
pub async fn run_controller(
    client: Client,
    ctx: Arc<Context>,
    triggers: mpsc::Receiver<ObjectRef<VSphereCluster>>,
) {
    let vsphere_clusters: Api<VSphereCluster> = Api::all(client.clone());
    let control_planes: Api<KubeadmControlPlane> = Api::all(client.clone());
    let machine_deployments: Api<MachineDeployment> = Api::all(client);

    let watcher_config = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    let controller = Controller::new(vsphere_clusters, watcher_config());
    let store = controller.store();

    info!("Starting VSphereCluster controller");
    controller
        .watches(
            control_planes,
            watcher_config(),
            mapper::<KubeadmControlPlane>(store.clone()),
        )
        .watches(
            machine_deployments,
            watcher_config(),
            mapper::<MachineDeployment>(store),
        )
        .reconcile_on(ReceiverStream::new(triggers))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("VSphereCluster"))
        .await;
    info!("VSphereCluster controller stopped");
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
