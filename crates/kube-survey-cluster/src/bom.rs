//! Cluster bill-of-materials assembly from live pods and nodes.

use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::{debug, warn};

use kube_survey_core::bom::{BomContainer, BomResult, Component, NodeInfo};
use kube_survey_core::image::image_digest;
use kube_survey_core::{Artifact, ImageReference};

use crate::discovery::filter_out;
use crate::gateway::ClusterGateway;
use crate::types::ScanOptions;
use crate::Result;

/// Namespace holding control-plane and addon pods.
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Namespace whose presence marks an OpenShift cluster.
pub const OPENSHIFT_MARKER_NAMESPACE: &str = "openshift-kube-apiserver";

/// OpenShift control-plane namespaces and the label naming their component.
const OPENSHIFT_COMPONENT_LABELS: &[(&str, &str)] = &[
    ("openshift-kube-apiserver", "apiserver"),
    ("openshift-kube-controller-manager", "kube-controller-manager"),
    ("openshift-kube-scheduler", "scheduler"),
    ("openshift-etcd", "etcd"),
];

const CONTROL_PLANE_ROLE_LABELS: &[&str] = &[
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Assemble the bill of materials of the whole cluster.
///
/// # Errors
///
/// Returns an error if nodes cannot be listed or the server version cannot
/// be read. Pod listing failures only drop that namespace's components, and a
/// marker namespace that cannot be read counts as absent.
pub async fn create_cluster_bom(gateway: &dyn ClusterGateway) -> Result<BomResult> {
    let is_openshift = match gateway.namespace_exists(OPENSHIFT_MARKER_NAMESPACE).await {
        Ok(exists) => exists,
        Err(e) => {
            debug!(error = %e, "Cannot read the OpenShift marker namespace, assuming Kubernetes");
            false
        }
    };
    let core_labels: Vec<(&str, &str)> = if is_openshift {
        OPENSHIFT_COMPONENT_LABELS.to_vec()
    } else {
        vec![(KUBE_SYSTEM_NAMESPACE, "component")]
    };

    let mut components = collect_components(gateway, &core_labels).await;
    let addons = collect_components(gateway, &[(KUBE_SYSTEM_NAMESPACE, "k8s-app")]).await;
    components.extend(addons);

    let nodes = gateway.list_nodes().await?;
    let nodes_info = nodes.iter().map(|n| node_info(n, &components)).collect();

    let version = gateway.server_version().await?;
    let mut bom = BomResult::cluster(&gateway.cluster_name(), &version);
    bom.components = components;
    bom.nodes_info = nodes_info;
    Ok(bom)
}

/// The cluster BOM as artifacts, honouring the scan's namespace filters.
///
/// Excluding the `node` kind drops node records.
///
/// # Errors
///
/// Returns an error if the BOM cannot be assembled or serialized.
pub async fn list_cluster_bom_artifacts(
    gateway: &dyn ClusterGateway,
    options: &ScanOptions,
) -> Result<Vec<Artifact>> {
    let mut bom = create_cluster_bom(gateway).await?;
    bom.components.retain(|c| {
        !filter_out(
            &options.include_namespaces,
            &options.exclude_namespaces,
            &c.namespace,
        )
    });
    if options
        .exclude_kinds
        .iter()
        .any(|k| k.eq_ignore_ascii_case("node"))
    {
        bom.nodes_info.clear();
    }
    Ok(bom.into_artifacts()?)
}

async fn collect_components(
    gateway: &dyn ClusterGateway,
    labels: &[(&str, &str)],
) -> Vec<Component> {
    let mut components = Vec::new();
    for (namespace, label) in labels {
        let pods = match gateway.list_pods(namespace, label).await {
            Ok(pods) => pods,
            Err(e) => {
                debug!(namespace, label, error = %e, "Skipping component namespace");
                continue;
            }
        };
        components.extend(pods.iter().filter_map(|pod| component_from_pod(pod, label)));
    }
    components
}

/// Describe the component a pod runs, keyed by the label that selected it.
///
/// Returns `None` when a container image cannot be parsed.
#[must_use]
pub fn component_from_pod(pod: &Pod, label: &str) -> Option<Component> {
    let mut containers = Vec::new();
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref());
    for status in statuses.into_iter().flatten() {
        let image = match ImageReference::parse(&status.image) {
            Ok(image) => image,
            Err(e) => {
                warn!(
                    pod = pod.metadata.name.as_deref().unwrap_or_default(),
                    error = %e,
                    "Skipping component with unparsable image"
                );
                return None;
            }
        };
        let Some(digest) = image_digest(&status.image_id, &status.image) else {
            continue;
        };
        containers.push(BomContainer::new(&image, &digest));
    }

    let label_value = pod.metadata.labels.as_ref().and_then(|l| l.get(label));
    let pod_name = label_value.and(pod.metadata.name.as_deref());
    Some(Component::from_label(
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod_name,
        label_value.map_or("", String::as_str),
        containers,
    ))
}

/// Describe a node and the component images it holds.
#[must_use]
pub fn node_info(node: &Node, components: &[Component]) -> NodeInfo {
    let name = node.metadata.name.clone().unwrap_or_default();
    let is_control_plane = node
        .metadata
        .labels
        .as_ref()
        .is_some_and(|l| CONTROL_PLANE_ROLE_LABELS.iter().any(|k| l.contains_key(*k)));
    let role = if is_control_plane { "master" } else { "worker" };

    let status = node.status.as_ref();
    let system = status
        .and_then(|s| s.node_info.clone())
        .unwrap_or_default();

    let mut info = NodeInfo {
        node_name: name.clone(),
        kubelet_version: system.kubelet_version,
        container_runtime_version: system.container_runtime_version,
        os_image: system.os_image,
        kube_proxy_version: system.kube_proxy_version,
        ..NodeInfo::default()
    };
    info.properties.insert("NodeRole".to_string(), role.to_string());
    info.properties.insert("HostName".to_string(), name);
    info.properties
        .insert("KernelVersion".to_string(), system.kernel_version);
    info.properties
        .insert("OperatingSystem".to_string(), system.operating_system);
    info.properties
        .insert("Architecture".to_string(), system.architecture);

    let node_images: Vec<&String> = status
        .and_then(|s| s.images.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|image| image.names.as_ref())
        .flatten()
        .collect();
    for component in components {
        for container in &component.containers {
            let key = container.image_key();
            if node_images.iter().any(|n| **n == key) {
                info.images.push(key);
            }
        }
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGateway;
    use k8s_openapi::api::core::v1::{
        ContainerImage, ContainerStatus, NodeStatus, NodeSystemInfo, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn system_pod(name: &str, label: (&str, &str), image: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(KUBE_SYSTEM_NAMESPACE.to_string()),
                labels: Some(BTreeMap::from([(label.0.to_string(), label.1.to_string())])),
                ..ObjectMeta::default()
            },
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: name.to_string(),
                    image: image.to_string(),
                    image_id: format!("docker-pullable://{image}@sha256:0011"),
                    ..ContainerStatus::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    fn control_plane_node(name: &str, images: &[&str]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    "node-role.kubernetes.io/control-plane".to_string(),
                    String::new(),
                )])),
                ..ObjectMeta::default()
            },
            status: Some(NodeStatus {
                node_info: Some(NodeSystemInfo {
                    kubelet_version: "v1.29.1".to_string(),
                    container_runtime_version: "containerd://1.7.11".to_string(),
                    os_image: "Debian GNU/Linux 12".to_string(),
                    kernel_version: "6.1.0".to_string(),
                    operating_system: "linux".to_string(),
                    architecture: "amd64".to_string(),
                    ..NodeSystemInfo::default()
                }),
                images: Some(vec![ContainerImage {
                    names: Some(images.iter().map(ToString::to_string).collect()),
                    ..ContainerImage::default()
                }]),
                ..NodeStatus::default()
            }),
            ..Node::default()
        }
    }

    fn seeded() -> MockGateway {
        let mock = MockGateway::new();
        mock.add_pod(system_pod(
            "kube-apiserver-cp",
            ("component", "kube-apiserver"),
            "registry.k8s.io/kube-apiserver:v1.29.1",
        ));
        mock.add_pod(system_pod(
            "coredns-abc",
            ("k8s-app", "kube-dns"),
            "registry.k8s.io/coredns/coredns:v1.11.1",
        ));
        mock.add_node(control_plane_node(
            "cp",
            &["registry.k8s.io/kube-apiserver:v1.29.1", "busybox:latest"],
        ));
        mock
    }

    #[tokio::test]
    async fn assembles_components_nodes_and_cluster_record() {
        let bom = create_cluster_bom(&seeded()).await.unwrap();

        assert_eq!(bom.id, "k8s.io/kubernetes");
        assert_eq!(bom.version, "1.29.1");
        assert_eq!(bom.properties["Name"], "mock-cluster");

        let names: Vec<&str> = bom.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["k8s.io/apiserver", "kube-dns"]);
        let apiserver = &bom.components[0];
        assert_eq!(apiserver.version, "1.29.1");
        assert_eq!(apiserver.containers[0].digest, "sha256:0011");

        let node = &bom.nodes_info[0];
        assert_eq!(node.properties["NodeRole"], "master");
        assert_eq!(node.kubelet_version, "v1.29.1");
        assert_eq!(node.images, vec!["registry.k8s.io/kube-apiserver:v1.29.1"]);
    }

    #[tokio::test]
    async fn openshift_namespaces_replace_the_component_label() {
        let mock = seeded();
        mock.add_namespace(OPENSHIFT_MARKER_NAMESPACE);
        let mut pod = system_pod(
            "apiserver-1",
            ("apiserver", "kube-apiserver"),
            "quay.io/openshift/kube-apiserver:v4.14",
        );
        pod.metadata.namespace = Some("openshift-kube-apiserver".to_string());
        mock.add_pod(pod);

        let bom = create_cluster_bom(&mock).await.unwrap();
        let namespaces: Vec<&str> = bom.components.iter().map(|c| c.namespace.as_str()).collect();
        assert_eq!(namespaces, ["openshift-kube-apiserver", "kube-system"]);
    }

    #[tokio::test]
    async fn forbidden_marker_namespace_still_builds() {
        let mock = seeded();
        mock.fail_namespace(OPENSHIFT_MARKER_NAMESPACE, 403);

        let bom = create_cluster_bom(&mock).await.unwrap();
        let names: Vec<&str> = bom.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["k8s.io/apiserver", "kube-dns"]);
        assert_eq!(bom.nodes_info.len(), 1);
    }

    #[tokio::test]
    async fn artifacts_honour_filters() {
        let options = ScanOptions {
            exclude_namespaces: vec!["kube-system".to_string()],
            exclude_kinds: vec!["Node".to_string()],
            ..ScanOptions::default()
        };
        let artifacts = list_cluster_bom_artifacts(&seeded(), &options).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, "Cluster");
    }

    #[test]
    fn workers_without_info_still_describe_themselves() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("w1".to_string()),
                ..ObjectMeta::default()
            },
            ..Node::default()
        };
        let info = node_info(&node, &[]);
        assert_eq!(info.properties["NodeRole"], "worker");
        assert_eq!(info.properties["HostName"], "w1");
        assert!(info.images.is_empty());
    }
}
