//! Fixtures shared by the unit tests of this crate

use std::collections::BTreeMap;

use capv_common::crd::{
    ClusterModule, KubeadmControlPlane, KubeadmControlPlaneMachineTemplate,
    KubeadmControlPlaneSpec, MachineDeployment, MachineDeploymentSpec, MachineSpec,
    MachineTemplateSpec, ObjectReference, VCenterVersion, VSphereCluster, VSphereClusterSpec,
    VSphereClusterStatus, VSphereMachineSpec, VSphereMachineTemplate,
    VSphereMachineTemplateResource, VSphereMachineTemplateSpec, VSPHERE_MACHINE_TEMPLATE_KIND,
};
use capv_common::CLUSTER_NAME_LABEL;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Resource;

pub(crate) const SERVER: &str = "vc.example.com";
pub(crate) const NAMESPACE: &str = "default";
pub(crate) const CLUSTER: &str = "prod";

fn labels() -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from([(
        CLUSTER_NAME_LABEL.to_string(),
        CLUSTER.to_string(),
    )]))
}

fn template_ref(owner: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("infrastructure.cluster.x-k8s.io/v1beta1".into()),
        kind: VSPHERE_MACHINE_TEMPLATE_KIND.into(),
        name: format!("{owner}-template"),
        namespace: None,
    }
}

pub(crate) fn control_plane(name: &str) -> KubeadmControlPlane {
    let mut kcp = KubeadmControlPlane::new(
        name,
        KubeadmControlPlaneSpec {
            replicas: Some(3),
            machine_template: KubeadmControlPlaneMachineTemplate {
                infrastructure_ref: template_ref(name),
            },
        },
    );
    kcp.metadata.namespace = Some(NAMESPACE.into());
    kcp.metadata.labels = labels();
    kcp
}

pub(crate) fn machine_deployment(name: &str) -> MachineDeployment {
    let mut md = MachineDeployment::new(
        name,
        MachineDeploymentSpec {
            cluster_name: CLUSTER.into(),
            template: MachineTemplateSpec {
                spec: MachineSpec {
                    infrastructure_ref: template_ref(name),
                },
            },
        },
    );
    md.metadata.namespace = Some(NAMESPACE.into());
    md.metadata.labels = labels();
    md
}

pub(crate) fn deleting<K: Resource>(mut obj: K) -> K {
    obj.meta_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
    obj
}

pub(crate) fn vsphere_cluster(modules: Vec<ClusterModule>) -> VSphereCluster {
    let mut cluster = vsphere_cluster_with_version(Some("8.0.2"));
    cluster.spec.cluster_modules = modules;
    cluster
}

pub(crate) fn vsphere_cluster_with_version(version: Option<&str>) -> VSphereCluster {
    let mut cluster = VSphereCluster::new(
        CLUSTER,
        VSphereClusterSpec {
            server: SERVER.into(),
            ..Default::default()
        },
    );
    cluster.metadata.namespace = Some(NAMESPACE.into());
    cluster.metadata.labels = labels();
    cluster.status = Some(VSphereClusterStatus {
        vcenter_version: version.map(VCenterVersion::new),
        ..Default::default()
    });
    cluster
}

pub(crate) fn record(control_plane: bool, name: &str, uuid: &str) -> ClusterModule {
    ClusterModule {
        control_plane,
        target_object_name: name.into(),
        module_uuid: uuid.into(),
    }
}

pub(crate) fn machine_template(name: &str, server: &str, pool: &str) -> VSphereMachineTemplate {
    let mut template = VSphereMachineTemplate::new(
        name,
        VSphereMachineTemplateSpec {
            template: VSphereMachineTemplateResource {
                spec: VSphereMachineSpec {
                    server: server.into(),
                    datacenter: "DC0".into(),
                    resource_pool: pool.into(),
                    template: "ubuntu-2204".into(),
                },
            },
        },
    );
    template.metadata.namespace = Some(NAMESPACE.into());
    template
}
