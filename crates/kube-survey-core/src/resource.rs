//! Resource identities and per-kind shape tables.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind name of pods.
pub const KIND_POD: &str = "Pod";
/// Kind name of cron jobs.
pub const KIND_CRON_JOB: &str = "CronJob";
/// Kind name of nodes.
pub const KIND_NODE: &str = "Node";

/// Resources listed in namespaced scans when the caller names none.
pub const DEFAULT_NAMESPACED_RESOURCES: &[&str] = &[
    "deployments",
    "pods",
    "replicasets",
    "replicationcontrollers",
    "statefulsets",
    "daemonsets",
    "cronjobs",
    "jobs",
    "services",
    "serviceaccounts",
    "configmaps",
    "roles",
    "rolebindings",
    "networkpolicies",
    "ingresses",
    "resourcequotas",
    "limitranges",
];

/// Resources added to whole-cluster scans.
pub const DEFAULT_CLUSTER_RESOURCES: &[&str] = &["clusterroles", "clusterrolebindings", "nodes"];

/// Kinds whose ownership makes an object a derived copy of another workload.
pub const BUILT_IN_WORKLOAD_KINDS: &[&str] = &[
    "ReplicaSet",
    "ReplicationController",
    "StatefulSet",
    "Deployment",
    "CronJob",
    "DaemonSet",
    "Job",
];

/// Kinds that carry a pod template at `spec.template.spec`.
const TEMPLATED_WORKLOAD_KINDS: &[&str] = &[
    "Deployment",
    "ReplicaSet",
    "ReplicationController",
    "StatefulSet",
    "DaemonSet",
    "Job",
];

/// A group/version/resource triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// API group; empty for the core group.
    pub group: String,
    /// API version.
    pub version: String,
    /// Plural resource name.
    pub resource: String,
}

impl ResourceIdentity {
    /// Create a new identity.
    #[must_use]
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// Whether objects of this resource live outside namespaces.
    #[must_use]
    pub fn is_cluster_scoped(&self) -> bool {
        DEFAULT_CLUSTER_RESOURCES.contains(&self.resource.as_str())
    }

    /// The `apiVersion` string for this identity.
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

/// Whether `kind` is one of the built-in workload controllers.
#[must_use]
pub fn is_built_in_workload(kind: &str) -> bool {
    BUILT_IN_WORKLOAD_KINDS.contains(&kind)
}

/// Path from the object root to the pod spec holding its containers.
///
/// This is the single table used both for image extraction and for
/// credential resolution. Kinds without a pod template still get the
/// generic `spec.template.spec` path, which simply finds nothing.
#[must_use]
pub fn pod_spec_path(kind: &str) -> &'static [&'static str] {
    match kind {
        KIND_POD => &["spec"],
        KIND_CRON_JOB => &["spec", "jobTemplate", "spec", "template", "spec"],
        _ => &["spec", "template", "spec"],
    }
}

/// Whether objects of `kind` carry a pod spec whose pull secrets apply.
#[must_use]
pub fn has_pod_template(kind: &str) -> bool {
    kind == KIND_POD || kind == KIND_CRON_JOB || TEMPLATED_WORKLOAD_KINDS.contains(&kind)
}
