//! Workload API server online detection
//!
//! A VSphereCluster must be reconciled again once its workload API server
//! comes up, even when nothing about the VSphereCluster itself changed. One
//! poller per CAPI Cluster (keyed by UID) waits for the API server, sends a
//! one-shot reconcile trigger, then waits for `ControlPlaneInitialized` before
//! giving up its slot.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capv_common::crd::{Cluster, VSphereCluster};
use capv_common::kube_utils::client_from_kubeconfig_yaml;
use capv_common::Error;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::{Node, Secret};
use kube::api::{Api, ListParams};
use kube::runtime::reflector::ObjectRef;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Interval between two probes of the same poller
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Suffix of the CAPI-generated kubeconfig secret, `<cluster>-kubeconfig`
pub const KUBECONFIG_SECRET_SUFFIX: &str = "-kubeconfig";

/// Data key holding the kubeconfig in that secret
pub const KUBECONFIG_SECRET_KEY: &str = "value";

/// Timeout for calls against a workload cluster
const WORKLOAD_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reads the state a poller waits on
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApiServerProbe: Send + Sync {
    /// Whether the workload cluster answers a node list
    async fn is_api_server_online(&self, namespace: &str, cluster_name: &str)
        -> Result<bool, Error>;

    /// Whether the CAPI Cluster reports `ControlPlaneInitialized`
    ///
    /// A Cluster that no longer exists counts as initialized so the poller
    /// can exit.
    async fn is_control_plane_initialized(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<bool, Error>;
}

/// Probe backed by the management cluster client
pub struct KubeApiServerProbe {
    client: Client,
}

impl KubeApiServerProbe {
    /// Create a probe using the management cluster client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn workload_kubeconfig(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Option<String>, Error> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let name = format!("{}{}", cluster_name, KUBECONFIG_SECRET_SUFFIX);
        let Some(secret) = secrets.get_opt(&name).await? else {
            return Ok(None);
        };
        let Some(value) = secret
            .data
            .as_ref()
            .and_then(|d| d.get(KUBECONFIG_SECRET_KEY))
        else {
            return Ok(None);
        };
        String::from_utf8(value.0.clone())
            .map(Some)
            .map_err(|e| Error::serialization(format!("kubeconfig secret {}: {}", name, e)))
    }
}

#[async_trait]
impl ApiServerProbe for KubeApiServerProbe {
    async fn is_api_server_online(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<bool, Error> {
        let Some(kubeconfig) = self.workload_kubeconfig(namespace, cluster_name).await? else {
            trace!(cluster = %cluster_name, "Kubeconfig secret not present yet");
            return Ok(false);
        };
        let client = client_from_kubeconfig_yaml(&kubeconfig, WORKLOAD_CLIENT_TIMEOUT).await?;
        let nodes: Api<Node> = Api::all(client);
        match nodes.list(&ListParams::default().limit(1)).await {
            Ok(_) => Ok(true),
            Err(e) => {
                trace!(cluster = %cluster_name, error = %e, "Workload API server not reachable");
                Ok(false)
            }
        }
    }

    async fn is_control_plane_initialized(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<bool, Error> {
        let clusters: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        match clusters.get_opt(cluster_name).await? {
            Some(cluster) => Ok(cluster.control_plane_initialized()),
            None => {
                info!(cluster = %cluster_name, "Cluster no longer exists, stopping poller");
                Ok(true)
            }
        }
    }
}

/// Requests a reconcile of a VSphereCluster outside of watch events
///
/// The receiving half is handed to `Controller::reconcile_on`.
#[derive(Clone)]
pub struct ReconcileTrigger {
    tx: mpsc::Sender<ObjectRef<VSphereCluster>>,
}

impl ReconcileTrigger {
    /// Create a trigger and the stream of requested objects
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ObjectRef<VSphereCluster>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Request a reconcile, giving up if `cancel` fires first
    ///
    /// Returns false when the request was not delivered.
    pub async fn trigger(&self, obj: ObjectRef<VSphereCluster>, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = self.tx.send(obj) => sent.is_ok(),
        }
    }
}

/// What a poller watches and whom it wakes up
#[derive(Clone, Debug)]
pub struct PollTarget {
    /// UID of the CAPI Cluster, the registry key
    pub cluster_uid: String,
    /// Namespace of the CAPI Cluster
    pub namespace: String,
    /// Name of the CAPI Cluster
    pub cluster_name: String,
    /// VSphereCluster to reconcile once the API server is online
    pub vsphere_cluster: ObjectRef<VSphereCluster>,
}

/// Registry of running API server pollers, at most one per CAPI Cluster
pub struct ApiServerPollers {
    active: Arc<DashMap<String, CancellationToken>>,
    token: CancellationToken,
    probe: Arc<dyn ApiServerProbe>,
    trigger: ReconcileTrigger,
    interval: Duration,
}

impl ApiServerPollers {
    /// Pollers run under child tokens of `token`
    pub fn new(
        probe: Arc<dyn ApiServerProbe>,
        trigger: ReconcileTrigger,
        token: CancellationToken,
    ) -> Self {
        Self {
            active: Arc::new(DashMap::new()),
            token,
            probe,
            trigger,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the probe interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start a poller for `target` unless one is already running
    ///
    /// Returns whether a new poller was spawned.
    pub fn start(&self, target: PollTarget) -> bool {
        let cancel = match self.active.entry(target.cluster_uid.clone()) {
            Entry::Occupied(_) => {
                debug!(cluster = %target.cluster_name, "API server poller already running");
                return false;
            }
            Entry::Vacant(slot) => {
                let cancel = self.token.child_token();
                slot.insert(cancel.clone());
                cancel
            }
        };

        let active = Arc::clone(&self.active);
        let probe = Arc::clone(&self.probe);
        let trigger = self.trigger.clone();
        let interval = self.interval;

        tokio::spawn(async move {
            run_poller(&target, probe.as_ref(), &trigger, interval, &cancel).await;
            active.remove(&target.cluster_uid);
        });
        true
    }

    /// Whether a poller holds the slot for `cluster_uid`
    pub fn is_polling(&self, cluster_uid: &str) -> bool {
        self.active.contains_key(cluster_uid)
    }

    /// Number of running pollers
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no poller is running
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Cancel every poller
    pub fn shutdown(&self) {
        let count = self.active.len();
        if count > 0 {
            info!(count, "Cancelling API server pollers");
        }
        self.token.cancel();
    }
}

async fn run_poller(
    target: &PollTarget,
    probe: &dyn ApiServerProbe,
    trigger: &ReconcileTrigger,
    interval: Duration,
    cancel: &CancellationToken,
) {
    let (ns, name) = (target.namespace.as_str(), target.cluster_name.as_str());

    info!(cluster = %name, "Start polling API server for online check");
    if !wait_for(cancel, interval, || probe.is_api_server_online(ns, name)).await {
        debug!(cluster = %name, "API server poller cancelled");
        return;
    }

    info!(cluster = %name, reason = "api-server-online", "Triggering VSphereCluster reconcile");
    if !trigger.trigger(target.vsphere_cluster.clone(), cancel).await {
        debug!(cluster = %name, "Reconcile trigger not delivered");
        return;
    }

    info!(cluster = %name, "Start polling for control plane initialized");
    if wait_for(cancel, interval, || probe.is_control_plane_initialized(ns, name)).await {
        info!(cluster = %name, "Control plane initialized, releasing API server poller");
    }
}

/// Run `check` until it returns `Ok(true)`; false once `cancel` fires
///
/// Errors count as "not yet".
async fn wait_for<F, Fut>(cancel: &CancellationToken, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            result = check() => result,
        };
        match result {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Poll check failed"),
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const INTERVAL: Duration = Duration::from_millis(5);
    const WAIT: Duration = Duration::from_secs(5);

    fn target(uid: &str) -> PollTarget {
        PollTarget {
            cluster_uid: uid.to_string(),
            namespace: "default".to_string(),
            cluster_name: "prod".to_string(),
            vsphere_cluster: ObjectRef::new("prod").within("default"),
        }
    }

    fn pollers(
        probe: MockApiServerProbe,
    ) -> (
        ApiServerPollers,
        mpsc::Receiver<ObjectRef<VSphereCluster>>,
    ) {
        let (trigger, rx) = ReconcileTrigger::channel(8);
        let pollers = ApiServerPollers::new(Arc::new(probe), trigger, CancellationToken::new())
            .with_interval(INTERVAL);
        (pollers, rx)
    }

    async fn wait_until_released(pollers: &ApiServerPollers, uid: &str) {
        tokio::time::timeout(WAIT, async {
            while pollers.is_polling(uid) {
                tokio::time::sleep(INTERVAL).await;
            }
        })
        .await
        .expect("poller should release its slot");
    }

    /// A poller waits for the API server, triggers once, then waits for
    /// the control plane before freeing its slot
    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn triggers_once_api_server_is_online() {
            let probes = Arc::new(AtomicU32::new(0));
            let counter = probes.clone();

            let mut probe = MockApiServerProbe::new();
            probe
                .expect_is_api_server_online()
                .withf(|ns, name| ns == "default" && name == "prod")
                .returning(move |_, _| Ok(counter.fetch_add(1, Ordering::SeqCst) >= 2));
            probe
                .expect_is_control_plane_initialized()
                .returning(|_, _| Ok(true));

            let (pollers, mut rx) = pollers(probe);
            assert!(pollers.start(target("uid-1")));

            let obj = tokio::time::timeout(WAIT, rx.recv())
                .await
                .expect("trigger should arrive")
                .expect("channel open");
            assert_eq!(obj.name, "prod");
            assert_eq!(obj.namespace.as_deref(), Some("default"));

            wait_until_released(&pollers, "uid-1").await;
            assert_eq!(probes.load(Ordering::SeqCst), 3);
            assert!(rx.try_recv().is_err());
        }

        #[tokio::test]
        async fn probe_errors_are_retried() {
            let probes = Arc::new(AtomicU32::new(0));
            let counter = probes.clone();

            let mut probe = MockApiServerProbe::new();
            probe.expect_is_api_server_online().returning(move |_, _| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::internal("connection refused"))
                } else {
                    Ok(true)
                }
            });
            probe
                .expect_is_control_plane_initialized()
                .returning(|_, _| Ok(true));

            let (pollers, mut rx) = pollers(probe);
            pollers.start(target("uid-1"));

            tokio::time::timeout(WAIT, rx.recv())
                .await
                .expect("trigger should arrive");
            wait_until_released(&pollers, "uid-1").await;
        }

        #[tokio::test]
        async fn slot_held_until_control_plane_initialized() {
            let checks = Arc::new(AtomicU32::new(0));
            let counter = checks.clone();

            let mut probe = MockApiServerProbe::new();
            probe
                .expect_is_api_server_online()
                .returning(|_, _| Ok(true));
            probe
                .expect_is_control_plane_initialized()
                .returning(move |_, _| Ok(counter.fetch_add(1, Ordering::SeqCst) >= 3));

            let (pollers, mut rx) = pollers(probe);
            pollers.start(target("uid-1"));
            tokio::time::timeout(WAIT, rx.recv())
                .await
                .expect("trigger should arrive");

            // Still initializing: a second start is refused
            if pollers.is_polling("uid-1") {
                assert!(!pollers.start(target("uid-1")));
            }

            wait_until_released(&pollers, "uid-1").await;
            assert!(checks.load(Ordering::SeqCst) >= 4);
        }
    }

    mod registry {
        use super::*;

        #[tokio::test]
        async fn one_poller_per_cluster() {
            let mut probe = MockApiServerProbe::new();
            probe
                .expect_is_api_server_online()
                .returning(|_, _| Ok(false));

            let (pollers, _rx) = pollers(probe);
            assert!(pollers.start(target("uid-1")));
            assert!(!pollers.start(target("uid-1")));
            assert!(pollers.start(target("uid-2")));
            assert_eq!(pollers.len(), 2);

            pollers.shutdown();
        }

        #[tokio::test]
        async fn shutdown_cancels_without_triggering() {
            let mut probe = MockApiServerProbe::new();
            probe
                .expect_is_api_server_online()
                .returning(|_, _| Ok(false));
            probe.expect_is_control_plane_initialized().never();

            let (pollers, mut rx) = pollers(probe);
            pollers.start(target("uid-1"));
            pollers.shutdown();

            wait_until_released(&pollers, "uid-1").await;
            assert!(pollers.is_empty());
            assert!(rx.try_recv().is_err());
        }

        #[tokio::test]
        async fn released_slot_can_be_reused() {
            let mut probe = MockApiServerProbe::new();
            probe
                .expect_is_api_server_online()
                .returning(|_, _| Ok(true));
            probe
                .expect_is_control_plane_initialized()
                .returning(|_, _| Ok(true));

            let (pollers, mut rx) = pollers(probe);
            pollers.start(target("uid-1"));
            wait_until_released(&pollers, "uid-1").await;

            assert!(pollers.start(target("uid-1")));
            wait_until_released(&pollers, "uid-1").await;

            assert!(rx.try_recv().is_ok());
            assert!(rx.try_recv().is_ok());
        }
    }

    mod trigger {
        use super::*;

        #[tokio::test]
        async fn delivers_object_ref() {
            let (trigger, mut rx) = ReconcileTrigger::channel(1);
            let cancel = CancellationToken::new();

            assert!(
                trigger
                    .trigger(ObjectRef::new("prod").within("default"), &cancel)
                    .await
            );
            assert_eq!(rx.recv().await.map(|o| o.name), Some("prod".to_string()));
        }

        #[tokio::test]
        async fn full_channel_yields_to_cancellation() {
            let (trigger, _rx) = ReconcileTrigger::channel(1);
            let cancel = CancellationToken::new();
            assert!(trigger.trigger(ObjectRef::new("a"), &cancel).await);

            cancel.cancel();
            assert!(!trigger.trigger(ObjectRef::new("b"), &cancel).await);
        }

        #[tokio::test]
        async fn closed_channel_is_not_delivered() {
            let (trigger, rx) = ReconcileTrigger::channel(1);
            drop(rx);
            assert!(
                !trigger
                    .trigger(ObjectRef::new("a"), &CancellationToken::new())
                    .await
            );
        }
    }
}
