//! Cluster bill-of-materials records.
//!
//! These are snapshots rebuilt on every call; nothing here talks to a
//! cluster.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::error::Result;
use crate::image::ImageReference;
use crate::object::RawObject;

/// Artifact kind of component records.
pub const KIND_CONTROL_PLANE_COMPONENTS: &str = "ControlPlaneComponents";
/// Artifact kind of node records.
pub const KIND_NODE_COMPONENTS: &str = "NodeComponents";
/// Artifact kind of the cluster record.
pub const KIND_CLUSTER: &str = "Cluster";

/// Identifier of the cluster record.
pub const CLUSTER_BOM_ID: &str = "k8s.io/kubernetes";

/// Upstream organisation to the component repositories it publishes.
const UPSTREAM_ORGS: &[(&str, &[&str])] = &[
    (
        "k8s.io",
        &[
            "controller-manager",
            "kubelet",
            "apiserver",
            "kubectl",
            "kubernetes",
            "kube-scheduler",
            "kube-proxy",
        ],
    ),
    ("sigs.k8s.io", &["secrets-store-csi-driver"]),
    ("go.etcd.io", &["etcd/v3"]),
];

/// Component label value to upstream repository name.
const UPSTREAM_REPOS: &[(&str, &str)] = &[
    ("kube-controller-manager", "controller-manager"),
    ("kubelet", "kubelet"),
    ("kube-apiserver", "apiserver"),
    ("kubectl", "kubectl"),
    ("kubernetes", "kubernetes"),
    ("kube-scheduler", "kube-scheduler"),
    ("kube-proxy", "kube-proxy"),
    ("api server", "apiserver"),
    ("etcd", "etcd/v3"),
    ("secrets-store-csi-driver", "secrets-store-csi-driver"),
];

/// Upstream repository to the `Type` property of core components.
const CORE_COMPONENT_TYPES: &[(&str, &str)] = &[
    ("controller-manager", "controlPlane"),
    ("apiserver", "controlPlane"),
    ("kube-scheduler", "controlPlane"),
    ("etcd/v3", "controlPlane"),
    ("kube-proxy", "node"),
];

/// A container image running as part of a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BomContainer {
    /// `repository:identifier`.
    pub id: String,
    /// Tag or digest the container runs.
    pub version: String,
    /// Repository path.
    pub repository: String,
    /// Registry host.
    pub registry: String,
    /// Content digest.
    pub digest: String,
}

impl BomContainer {
    /// Describe a running container from its image and resolved digest.
    #[must_use]
    pub fn new(image: &ImageReference, digest: &str) -> Self {
        let version = image.identifier().to_string();
        Self {
            id: format!("{}:{version}", image.repository),
            version,
            repository: image.repository.clone(),
            registry: image.registry.clone(),
            digest: digest.to_string(),
        }
    }

    /// The `registry/repository:version` key nodes report images under.
    #[must_use]
    pub fn image_key(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.version)
    }
}

/// A control-plane component or addon.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Namespace the component runs in.
    pub namespace: String,
    /// Upstream component name, e.g. `k8s.io/apiserver`.
    pub name: String,
    /// Component version without a leading `v`.
    pub version: String,
    /// Extra properties (`Name`, `Type`).
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Containers of the component's pod.
    #[serde(default)]
    pub containers: Vec<BomContainer>,
}

impl Component {
    /// Assemble a component from the label value that identified its pod.
    ///
    /// The name is normalized through the upstream tables and the version is
    /// taken from the first container whose id mentions the label value.
    #[must_use]
    pub fn from_label(
        namespace: &str,
        pod_name: Option<&str>,
        label_value: &str,
        containers: Vec<BomContainer>,
    ) -> Self {
        let mut properties = BTreeMap::new();
        if let Some(pod_name) = pod_name {
            properties.insert("Name".to_string(), pod_name.to_string());
        }

        let repo = upstream_repo(label_value);
        if let Some(kind) = core_component_type(repo) {
            properties.insert("Type".to_string(), kind.to_string());
        }
        let name = match upstream_org(repo) {
            Some(org) => format!("{org}/{repo}"),
            None => repo.to_string(),
        };

        let version = containers
            .iter()
            .find(|c| c.id.contains(label_value))
            .map(|c| trim_version(&c.version))
            .unwrap_or_default();

        Self {
            namespace: namespace.to_string(),
            name,
            version,
            properties,
            containers,
        }
    }
}

/// Inventory of a single node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Node name.
    pub node_name: String,
    /// Kubelet version.
    pub kubelet_version: String,
    /// Container runtime version.
    pub container_runtime_version: String,
    /// OS image.
    pub os_image: String,
    /// Kube-proxy version.
    pub kube_proxy_version: String,
    /// `NodeRole`, `HostName`, `KernelVersion`, `OperatingSystem`, `Architecture`.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Component image keys present on the node.
    #[serde(default)]
    pub images: Vec<String>,
}

/// A full cluster bill of materials.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BomResult {
    /// Cluster identifier.
    #[serde(rename = "name")]
    pub id: String,
    /// Record type.
    #[serde(default, skip_serializing_if = "String::is_empty", rename = "type")]
    pub kind: String,
    /// Server version without a leading `v`.
    #[serde(default)]
    pub version: String,
    /// Cluster properties (`Name`, `Type`).
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Components.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
    /// Nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "nodesInfo")]
    pub nodes_info: Vec<NodeInfo>,
}

impl BomResult {
    /// Create the cluster record for `cluster_name` at `git_version`.
    #[must_use]
    pub fn cluster(cluster_name: &str, git_version: &str) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert("Name".to_string(), cluster_name.to_string());
        properties.insert("Type".to_string(), "cluster".to_string());
        Self {
            id: CLUSTER_BOM_ID.to_string(),
            kind: KIND_CLUSTER.to_string(),
            version: trim_version(git_version),
            properties,
            components: Vec::new(),
            nodes_info: Vec::new(),
        }
    }

    /// Flatten into artifacts: one per component, one per node, then the
    /// cluster record itself (without its children, typed `ClusterInfo`).
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be serialized.
    pub fn into_artifacts(self) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::with_capacity(self.components.len() + self.nodes_info.len() + 1);

        for component in &self.components {
            artifacts.push(Artifact::from_parts(
                KIND_CONTROL_PLANE_COMPONENTS,
                component.namespace.clone(),
                component.name.clone(),
                RawObject::from_serializable(component)?,
            ));
        }
        for node in &self.nodes_info {
            artifacts.push(Artifact::from_parts(
                KIND_NODE_COMPONENTS,
                String::new(),
                node.node_name.clone(),
                RawObject::from_serializable(node)?,
            ));
        }

        let summary = Self {
            id: self.id.clone(),
            kind: "ClusterInfo".to_string(),
            version: self.version,
            properties: self.properties,
            components: Vec::new(),
            nodes_info: Vec::new(),
        };
        artifacts.push(Artifact::from_parts(
            KIND_CLUSTER,
            String::new(),
            self.id,
            RawObject::from_serializable(&summary)?,
        ));

        Ok(artifacts)
    }
}

/// Strip leading and trailing `v`/`V` and surrounding whitespace.
#[must_use]
pub fn trim_version(version: &str) -> String {
    version.trim_matches(|c| c == 'v' || c == 'V').trim().to_string()
}

fn upstream_repo(label_value: &str) -> &str {
    UPSTREAM_REPOS
        .iter()
        .find(|(label, _)| *label == label_value)
        .map_or(label_value, |(_, repo)| *repo)
}

fn upstream_org(repo: &str) -> Option<&'static str> {
    let repo = repo.to_lowercase();
    UPSTREAM_ORGS
        .iter()
        .find(|(_, repos)| repos.contains(&repo.as_str()))
        .map(|(org, _)| *org)
}

fn core_component_type(repo: &str) -> Option<&'static str> {
    CORE_COMPONENT_TYPES
        .iter()
        .find(|(name, _)| *name == repo)
        .map(|(_, kind)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(image: &str) -> BomContainer {
        BomContainer::new(&ImageReference::parse(image).unwrap(), "sha256:abc")
    }

    #[test]
    fn container_ids_and_keys() {
        let c = container("registry.k8s.io/kube-apiserver:v1.29.1");
        assert_eq!(c.id, "kube-apiserver:v1.29.1");
        assert_eq!(c.version, "v1.29.1");
        assert_eq!(c.image_key(), "registry.k8s.io/kube-apiserver:v1.29.1");
    }

    #[test]
    fn core_components_are_normalized() {
        let component = Component::from_label(
            "kube-system",
            Some("kube-apiserver-node1"),
            "kube-apiserver",
            vec![container("registry.k8s.io/kube-apiserver:v1.29.1")],
        );
        assert_eq!(component.name, "k8s.io/apiserver");
        assert_eq!(component.version, "1.29.1");
        assert_eq!(component.properties["Type"], "controlPlane");
        assert_eq!(component.properties["Name"], "kube-apiserver-node1");

        let etcd = Component::from_label(
            "kube-system",
            None,
            "etcd",
            vec![container("registry.k8s.io/etcd:3.5.10-0")],
        );
        assert_eq!(etcd.name, "go.etcd.io/etcd/v3");
        assert_eq!(etcd.version, "3.5.10-0");
        assert!(!etcd.properties.contains_key("Name"));
    }

    #[test]
    fn addons_keep_their_label_value() {
        let dns = Component::from_label(
            "kube-system",
            Some("coredns-1"),
            "kube-dns",
            vec![container("registry.k8s.io/coredns/coredns:v1.11.1")],
        );
        assert_eq!(dns.name, "kube-dns");
        assert_eq!(dns.version, "");
        assert!(!dns.properties.contains_key("Type"));
    }

    #[test]
    fn bom_flattens_into_artifacts() {
        let mut bom = BomResult::cluster("kind-kind", "v1.29.1");
        bom.components.push(Component {
            namespace: "kube-system".into(),
            name: "k8s.io/apiserver".into(),
            ..Component::default()
        });
        bom.nodes_info.push(NodeInfo {
            node_name: "node1".into(),
            ..NodeInfo::default()
        });

        let artifacts = bom.into_artifacts().unwrap();
        let kinds: Vec<&str> = artifacts.iter().map(|a| a.kind.as_str()).collect();
        assert_eq!(kinds, ["ControlPlaneComponents", "NodeComponents", "Cluster"]);

        let cluster = &artifacts[2];
        assert_eq!(cluster.name, "k8s.io/kubernetes");
        assert_eq!(cluster.raw.as_map()["type"], "ClusterInfo");
        assert_eq!(cluster.raw.as_map()["version"], "1.29.1");
        assert_eq!(cluster.raw.as_map()["name"], "k8s.io/kubernetes");
        assert!(!cluster.raw.as_map().contains_key("components"));
    }
}
