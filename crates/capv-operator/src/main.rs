//! vSphere infrastructure provider operator - VSphereCluster and cluster module
//! reconciliation

mod config;
mod controller_runner;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kube::CustomResourceExt;
use tokio_util::sync::CancellationToken;

use capv_cluster::{ApiServerPollers, Context, KubeApiServerProbe, ReconcileTrigger};
use capv_common::crd::VSphereCluster;
use capv_common::kube_utils::create_client;
use capv_common::telemetry::{init_telemetry, TelemetryConfig};
use capv_vcenter::SessionManager;

use crate::config::{FeatureGates, OperatorConfig};

/// Buffered reconcile requests from API server pollers
const TRIGGER_CHANNEL_CAPACITY: usize = 64;

/// vSphere infrastructure provider for Cluster API
#[derive(Parser, Debug)]
#[command(name = "capv-operator", version, about, long_about = None)]
struct Cli {
    /// Print the VSphereCluster CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Kubeconfig of the management cluster (in-cluster config when unset)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// vCenter user name
    #[arg(long, env = "VSPHERE_USERNAME")]
    vsphere_username: Option<String>,

    /// vCenter password
    #[arg(long, env = "VSPHERE_PASSWORD", hide_env_values = true)]
    vsphere_password: Option<String>,

    /// Comma separated feature gates, e.g. NodeAntiAffinity=true
    #[arg(long, env = "FEATURE_GATES", default_value = "")]
    feature_gates: FeatureGates,

    /// Accept any certificate presented by vCenter
    #[arg(long, env = "VSPHERE_INSECURE")]
    insecure_skip_tls_verify: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&VSphereCluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let config = OperatorConfig::new(
        cli.kubeconfig,
        cli.vsphere_username,
        cli.vsphere_password,
        cli.feature_gates,
        cli.insecure_skip_tls_verify,
    )?;
    run(config).await
}

async fn run(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!(
        node_anti_affinity = config.feature_gates.node_anti_affinity(),
        insecure_skip_tls_verify = config.session.insecure_skip_tls_verify,
        "Starting capv-operator"
    );

    let client = create_client(config.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let sessions = Arc::new(
        SessionManager::new(config.credentials, config.session)
            .map_err(|e| anyhow::anyhow!("Failed to build vCenter client: {}", e))?,
    );

    let token = CancellationToken::new();
    let (trigger, triggers) = ReconcileTrigger::channel(TRIGGER_CHANNEL_CAPACITY);
    let pollers = Arc::new(ApiServerPollers::new(
        Arc::new(KubeApiServerProbe::new(client.clone())),
        trigger,
        token.clone(),
    ));

    let ctx = Arc::new(
        Context::builder(client.clone(), sessions.clone(), pollers.clone())
            .node_anti_affinity(config.feature_gates.node_anti_affinity())
            .build(),
    );

    controller_runner::run_controller(client, ctx, triggers).await;

    tracing::info!(running = pollers.len(), "Stopping API server pollers");
    pollers.shutdown();
    sessions.logout_all().await;

    tracing::info!("capv-operator shutting down");
    Ok(())
}
