//! The normalized unit of scannable output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::credentials::{CredentialMap, RegistryAuth};
use crate::error::{CoreError, Result};
use crate::object::RawObject;
use crate::resource::{pod_spec_path, KIND_NODE};

/// Container lists scanned for images, in output order.
const CONTAINER_FIELDS: &[&str] = &["containers", "ephemeralContainers", "initContainers"];

/// A scannable resource with its images and resolved credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Namespace; empty for cluster-scoped objects.
    pub namespace: String,
    /// Kind of the source object, or a synthetic kind for BOM records.
    pub kind: String,
    /// Name of the source object.
    pub name: String,
    /// Labels, populated only for `Node` artifacts.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Container images in container, ephemeral, init order.
    #[serde(default)]
    pub images: Vec<String>,
    /// Credentials found for the images.
    #[serde(default)]
    pub credentials: Vec<RegistryAuth>,
    /// The full source object.
    pub raw: RawObject,
}

impl Artifact {
    /// Build an artifact from a raw object.
    ///
    /// Images come from the kind's pod spec; each image whose registry has
    /// credentials in `auths` contributes one credential entry.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::FieldType` if a container list or an `image`
    /// field holds the wrong type.
    pub fn from_object(object: RawObject, auths: &CredentialMap) -> Result<Self> {
        let base = pod_spec_path(object.kind());
        let mut images = Vec::new();

        for field in CONTAINER_FIELDS {
            let path: Vec<&str> = base.iter().copied().chain([*field]).collect();
            let Some(containers) = object.nested_slice(&path)? else {
                continue;
            };
            for container in containers {
                let Value::Object(container) = container else {
                    return Err(CoreError::FieldType {
                        path: path.join("."),
                        expected: "a list of maps",
                    });
                };
                match container.get("image") {
                    None => {}
                    Some(Value::String(image)) => images.push(image.clone()),
                    Some(_) => {
                        return Err(CoreError::FieldType {
                            path: format!("{}.image", path.join(".")),
                            expected: "a string",
                        })
                    }
                }
            }
        }

        let credentials = images
            .iter()
            .filter_map(|image| match auths.lookup(image) {
                Ok(auth) => auth.cloned(),
                Err(e) => {
                    debug!(image = %image, error = %e, "No credentials for unparsable image");
                    None
                }
            })
            .collect();

        let labels = if object.kind() == KIND_NODE {
            object.labels()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            namespace: object.namespace().to_string(),
            kind: object.kind().to_string(),
            name: object.name().to_string(),
            labels,
            images,
            credentials,
            raw: object,
        })
    }

    /// Build an image-less artifact around a synthetic record.
    #[must_use]
    pub fn from_parts(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        raw: RawObject,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
            labels: BTreeMap::new(),
            images: Vec::new(),
            credentials: Vec::new(),
            raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> RawObject {
        RawObject::from_value(value).unwrap()
    }

    #[test]
    fn pod_with_single_container() {
        let pod = object(json!({
            "kind": "Pod",
            "metadata": { "name": "web", "namespace": "default", "labels": { "a": "b" } },
            "spec": { "containers": [{ "name": "web", "image": "nginx:1.14" }] }
        }));
        let artifact = Artifact::from_object(pod, &CredentialMap::new()).unwrap();
        assert_eq!(artifact.kind, "Pod");
        assert_eq!(artifact.name, "web");
        assert_eq!(artifact.namespace, "default");
        assert_eq!(artifact.images, vec!["nginx:1.14"]);
        assert!(artifact.labels.is_empty());
        assert!(artifact.credentials.is_empty());
        assert_eq!(artifact.raw.name(), "web");
    }

    #[test]
    fn cron_job_images() {
        let cron = object(json!({
            "kind": "CronJob",
            "metadata": { "name": "hello" },
            "spec": { "jobTemplate": { "spec": { "template": { "spec": {
                "containers": [{ "name": "hello", "image": "busybox:1.28" }]
            }}}}}
        }));
        let artifact = Artifact::from_object(cron, &CredentialMap::new()).unwrap();
        assert_eq!(artifact.images, vec!["busybox:1.28"]);
        assert_eq!(artifact.namespace, "");
    }

    #[test]
    fn container_order_and_missing_images() {
        let deploy = object(json!({
            "kind": "Deployment",
            "metadata": { "name": "app", "namespace": "ns" },
            "spec": { "template": { "spec": {
                "initContainers": [{ "name": "init", "image": "alpine:3" }],
                "containers": [{ "name": "main", "image": "app:1" }, { "name": "noimage" }],
                "ephemeralContainers": [{ "name": "debug", "image": "busybox" }]
            }}}
        }));
        let artifact = Artifact::from_object(deploy, &CredentialMap::new()).unwrap();
        assert_eq!(artifact.images, vec!["app:1", "busybox", "alpine:3"]);
    }

    #[test]
    fn wrong_container_type_is_an_error() {
        let pod = object(json!({
            "kind": "Pod",
            "metadata": { "name": "bad" },
            "spec": { "containers": "nginx" }
        }));
        assert!(matches!(
            Artifact::from_object(pod, &CredentialMap::new()),
            Err(CoreError::FieldType { .. })
        ));
    }

    #[test]
    fn credentials_follow_images() {
        let mut auths = CredentialMap::new();
        auths.insert("quay.io", "u", "p");
        let pod = object(json!({
            "kind": "Pod",
            "metadata": { "name": "p" },
            "spec": { "containers": [
                { "name": "a", "image": "quay.io/org/a:1" },
                { "name": "b", "image": "nginx" },
                { "name": "c", "image": "quay.io/org/c:1" },
                { "name": "d", "image": "quay.io/Org/D" }
            ]}
        }));
        let artifact = Artifact::from_object(pod, &auths).unwrap();
        assert_eq!(artifact.images.len(), 4);
        assert_eq!(artifact.credentials.len(), 2);
        assert!(artifact.credentials.iter().all(|c| c.host == "quay.io"));
    }

    #[test]
    fn nodes_keep_labels() {
        let node = object(json!({
            "kind": "Node",
            "metadata": { "name": "n1", "labels": { "kubernetes.io/hostname": "n1" } }
        }));
        let artifact = Artifact::from_object(node, &CredentialMap::new()).unwrap();
        assert_eq!(artifact.labels["kubernetes.io/hostname"], "n1");
        assert!(artifact.images.is_empty());
    }
}
