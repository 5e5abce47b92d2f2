//! Resource discovery pipeline.
//!
//! Enumerates resource identities, lists every object, drops derived and
//! filtered objects, resolves pull credentials and extracts artifacts. The
//! pipeline is sequential per resource and never retries.

use serde_json::Value;
use tracing::{debug, error, info, warn};

use kube_survey_core::object::LAST_APPLIED_ANNOTATION;
use kube_survey_core::resource::{
    is_built_in_workload, DEFAULT_CLUSTER_RESOURCES, DEFAULT_NAMESPACED_RESOURCES, KIND_NODE,
};
use kube_survey_core::{Artifact, RawObject, ResourceIdentity};

use crate::bom::list_cluster_bom_artifacts;
use crate::credentials::resolve_credentials;
use crate::gateway::ClusterGateway;
use crate::types::ScanOptions;
use crate::{ClusterError, Result};

/// Resource identities a scan covers.
///
/// Explicit kinds win; otherwise the default namespaced set, plus the
/// cluster set when the scan is not namespaced.
///
/// # Errors
///
/// Returns `ClusterError::UnknownResource` for any name the cluster does not serve.
pub async fn resolve_resources(
    gateway: &dyn ClusterGateway,
    options: &ScanOptions,
) -> Result<Vec<ResourceIdentity>> {
    let names: Vec<&str> = if options.kinds.is_empty() {
        let mut names = DEFAULT_NAMESPACED_RESOURCES.to_vec();
        if !options.is_namespaced() {
            names.extend_from_slice(DEFAULT_CLUSTER_RESOURCES);
        }
        names
    } else {
        options.kinds.iter().map(String::as_str).collect()
    };

    let mut resources = Vec::with_capacity(names.len());
    for name in names {
        resources.push(gateway.resolve_resource(name).await?);
    }
    Ok(resources)
}

/// List every artifact the scan covers.
///
/// Whole-cluster scans also carry the cluster BOM artifacts at the end.
///
/// # Errors
///
/// Returns an error if resource resolution fails, a listing fails for a
/// reason other than not-found or forbidden, credential resolution fails or
/// an object cannot be extracted.
pub async fn list_artifacts(
    gateway: &dyn ClusterGateway,
    options: &ScanOptions,
) -> Result<Vec<Artifact>> {
    let resources = resolve_resources(gateway, options).await?;
    let namespace = options.namespace.as_deref().filter(|ns| !ns.is_empty());
    let mut artifacts = Vec::new();

    for resource in &resources {
        let scope = if resource.is_cluster_scoped() { None } else { namespace };
        let objects = match gateway.list_objects(resource, scope).await {
            Ok(objects) => objects,
            Err(e) if e.is_not_found() || e.is_forbidden() => {
                error!(resource = %resource, error = %e, "Unable to list resources");
                continue;
            }
            Err(e) => {
                return Err(ClusterError::List {
                    resource: resource.to_string(),
                    source: Box::new(e),
                })
            }
        };
        debug!(resource = %resource, count = objects.len(), "Listed resources");

        for object in objects {
            if is_ignored(&object, options) {
                continue;
            }
            let Some(object) = effective_object(object) else {
                continue;
            };
            let auths = resolve_credentials(gateway, &object).await?;
            artifacts.push(Artifact::from_object(object, &auths)?);
        }
    }

    if !options.is_namespaced() {
        artifacts.extend(list_cluster_bom_artifacts(gateway, options).await?);
    }

    info!(count = artifacts.len(), "Discovered artifacts");
    Ok(artifacts)
}

/// Fetch a single artifact by kind and name.
///
/// # Errors
///
/// Returns an error if the kind is unknown, the object cannot be fetched or
/// extraction fails.
pub async fn get_artifact(
    gateway: &dyn ClusterGateway,
    namespace: Option<&str>,
    kind: &str,
    name: &str,
) -> Result<Artifact> {
    let resource = gateway.resolve_resource(kind).await?;
    let scope = if resource.is_cluster_scoped() { None } else { namespace };
    let object = gateway.get_object(&resource, scope, name).await?;
    let object = effective_object(object.clone()).unwrap_or(object);
    let auths = resolve_credentials(gateway, &object).await?;
    Ok(Artifact::from_object(object, &auths)?)
}

/// Whether an object is left out of the scan.
fn is_ignored(object: &RawObject, options: &ScanOptions) -> bool {
    if object.kind() == KIND_NODE {
        if !is_node_ready(object) {
            return true;
        }
    } else if options.kinds.is_empty() && has_built_in_owner(object) {
        return true;
    }
    if options.exclude_owned && has_built_in_owner(object) {
        return true;
    }
    if filter_out(&options.include_kinds, &options.exclude_kinds, object.kind()) {
        return true;
    }
    filter_out(
        &options.include_namespaces,
        &options.exclude_namespaces,
        object.namespace(),
    )
}

/// Whether `key` is filtered out by an include or exclude list.
///
/// Matching is case-insensitive. Setting both lists, or neither, filters
/// nothing.
#[must_use]
pub fn filter_out(include: &[String], exclude: &[String], key: &str) -> bool {
    let contains = |list: &[String]| list.iter().any(|v| v.eq_ignore_ascii_case(key));
    match (include.is_empty(), exclude.is_empty()) {
        (true, false) => contains(exclude),
        (false, true) => !contains(include),
        _ => false,
    }
}

/// Whether any owner of the object is a built-in workload controller.
#[must_use]
pub fn has_built_in_owner(object: &RawObject) -> bool {
    object
        .owner_references()
        .iter()
        .any(|owner| is_built_in_workload(&owner.kind))
}

/// Whether a node reports `Ready=True`.
#[must_use]
pub fn is_node_ready(object: &RawObject) -> bool {
    let Ok(Some(conditions)) = object.nested_slice(&["status", "conditions"]) else {
        return false;
    };
    conditions.iter().any(|c| {
        c.get("type").and_then(Value::as_str) == Some("Ready")
            && c.get("status").and_then(Value::as_str) == Some("True")
    })
}

/// The object as last applied by `kubectl`, when it carries that annotation.
///
/// The live namespace is kept when the applied manifest omits it. Returns
/// `None` when the annotation is present but unreadable.
fn effective_object(object: RawObject) -> Option<RawObject> {
    let Some(manifest) = object.annotation(LAST_APPLIED_ANNOTATION) else {
        return Some(object);
    };
    let applied = serde_json::from_str::<Value>(manifest)
        .map_err(kube_survey_core::CoreError::from)
        .and_then(RawObject::from_value);
    match applied {
        Ok(mut applied) => {
            if applied.namespace().is_empty() && !object.namespace().is_empty() {
                let mut metadata = applied
                    .as_map()
                    .get("metadata")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                if let Value::Object(map) = &mut metadata {
                    map.insert("namespace".to_string(), object.namespace().into());
                }
                applied.insert("metadata", metadata);
            }
            Some(applied)
        }
        Err(e) => {
            warn!(
                kind = object.kind(),
                namespace = object.namespace(),
                name = object.name(),
                error = %e,
                "Skipping object with unreadable last-applied configuration"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGateway;
    use serde_json::json;

    fn object(value: Value) -> RawObject {
        RawObject::from_value(value).unwrap()
    }

    fn pod(namespace: &str, name: &str, image: &str) -> RawObject {
        object(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name, "namespace": namespace },
            "spec": { "containers": [{ "name": name, "image": image }] }
        }))
    }

    fn owned_pod(namespace: &str, name: &str) -> RawObject {
        object(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "ownerReferences": [{ "kind": "ReplicaSet", "name": "web-123" }]
            },
            "spec": { "containers": [{ "name": name, "image": "nginx" }] }
        }))
    }

    fn node(name: &str, ready: &str) -> RawObject {
        object(json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": { "name": name, "labels": { "kubernetes.io/hostname": name } },
            "status": { "conditions": [{ "type": "Ready", "status": ready }] }
        }))
    }

    fn pods() -> ResourceIdentity {
        ResourceIdentity::new("", "v1", "pods")
    }

    fn nodes() -> ResourceIdentity {
        ResourceIdentity::new("", "v1", "nodes")
    }

    fn mock() -> MockGateway {
        let mock = MockGateway::new();
        mock.add_default_resources();
        mock
    }

    #[test]
    fn include_and_exclude_filters() {
        let pods = vec!["Pod".to_string()];
        let none: Vec<String> = Vec::new();
        assert!(!filter_out(&none, &none, "Pod"));
        assert!(filter_out(&none, &pods, "pod"));
        assert!(!filter_out(&pods, &none, "POD"));
        assert!(filter_out(&pods, &none, "Service"));
        // both set on one axis means no filtering
        assert!(!filter_out(&pods, &pods, "Pod"));
        assert!(!filter_out(&pods, &pods, "Service"));
    }

    #[test]
    fn node_readiness() {
        assert!(is_node_ready(&node("a", "True")));
        assert!(!is_node_ready(&node("a", "Unknown")));
        assert!(!is_node_ready(&object(json!({ "kind": "Node" }))));
    }

    #[test]
    fn last_applied_replaces_the_live_object() {
        let applied = json!({
            "apiVersion": "apps/v1beta1",
            "kind": "Deployment",
            "metadata": { "name": "web" }
        });
        let live = object(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "shop",
                "annotations": { LAST_APPLIED_ANNOTATION: applied.to_string() }
            }
        }));
        let effective = effective_object(live).unwrap();
        assert_eq!(effective.api_version(), "apps/v1beta1");
        assert_eq!(effective.namespace(), "shop");

        let broken = object(json!({
            "kind": "Pod",
            "metadata": { "name": "p", "annotations": { LAST_APPLIED_ANNOTATION: "{not json" } }
        }));
        assert!(effective_object(broken).is_none());
    }

    #[tokio::test]
    async fn resource_sets_follow_the_scan_mode() {
        let mock = mock();
        let namespaced = resolve_resources(&mock, &ScanOptions::with_namespace("shop"))
            .await
            .unwrap();
        assert_eq!(namespaced.len(), DEFAULT_NAMESPACED_RESOURCES.len());
        assert!(namespaced.iter().all(|r| !r.is_cluster_scoped()));

        let cluster = resolve_resources(&mock, &ScanOptions::default()).await.unwrap();
        assert_eq!(
            cluster.len(),
            DEFAULT_NAMESPACED_RESOURCES.len() + DEFAULT_CLUSTER_RESOURCES.len()
        );

        let unknown = ScanOptions {
            kinds: vec!["widgets".to_string()],
            ..ScanOptions::default()
        };
        assert!(matches!(
            resolve_resources(&mock, &unknown).await,
            Err(ClusterError::UnknownResource(_))
        ));
    }

    #[tokio::test]
    async fn single_pod_becomes_one_artifact() {
        let mock = mock();
        mock.add_object(&pods(), pod("default", "web", "nginx:1.14"));
        let options = ScanOptions {
            namespace: Some("default".to_string()),
            kinds: vec!["pods".to_string()],
            ..ScanOptions::default()
        };

        let artifacts = list_artifacts(&mock, &options).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, "Pod");
        assert_eq!(artifacts[0].images, vec!["nginx:1.14"]);
    }

    #[tokio::test]
    async fn owned_objects_are_skipped_unless_kinds_are_explicit() {
        let mock = mock();
        mock.add_object(&pods(), pod("shop", "standalone", "nginx"));
        mock.add_object(&pods(), owned_pod("shop", "web-123-abc"));

        let default_scan = list_artifacts(&mock, &ScanOptions::with_namespace("shop"))
            .await
            .unwrap();
        assert_eq!(default_scan.len(), 1);
        assert_eq!(default_scan[0].name, "standalone");

        let explicit = ScanOptions {
            namespace: Some("shop".to_string()),
            kinds: vec!["pods".to_string()],
            ..ScanOptions::default()
        };
        assert_eq!(list_artifacts(&mock, &explicit).await.unwrap().len(), 2);

        let exclude_owned = ScanOptions {
            exclude_owned: true,
            ..explicit
        };
        assert_eq!(list_artifacts(&mock, &exclude_owned).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn forbidden_resources_are_skipped_and_other_errors_abort() {
        let mock = mock();
        mock.add_object(&pods(), pod("shop", "web", "nginx"));
        mock.fail_list("services", 403);

        let artifacts = list_artifacts(&mock, &ScanOptions::with_namespace("shop"))
            .await
            .unwrap();
        assert_eq!(artifacts.len(), 1);

        mock.fail_list("configmaps", 500);
        let err = list_artifacts(&mock, &ScanOptions::with_namespace("shop"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::List { .. }));
    }

    #[tokio::test]
    async fn namespace_filters_apply_to_listed_objects() {
        let mock = mock();
        mock.add_object(&pods(), pod("shop", "a", "nginx"));
        mock.add_object(&pods(), pod("kube-system", "b", "nginx"));

        let options = ScanOptions {
            all_namespaces: true,
            kinds: vec!["pod".to_string()],
            exclude_namespaces: vec!["KUBE-SYSTEM".to_string()],
            ..ScanOptions::default()
        };
        let artifacts = list_artifacts(&mock, &options).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].namespace, "shop");
    }

    #[tokio::test]
    async fn cluster_scan_keeps_ready_nodes_and_appends_bom() {
        let mock = mock();
        mock.add_object(&nodes(), node("ready", "True"));
        mock.add_object(&nodes(), node("lost", "Unknown"));

        let artifacts = list_artifacts(&mock, &ScanOptions::default()).await.unwrap();
        let nodes: Vec<&Artifact> = artifacts.iter().filter(|a| a.kind == "Node").collect();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "ready");
        assert_eq!(nodes[0].labels["kubernetes.io/hostname"], "ready");
        assert_eq!(artifacts.last().unwrap().kind, "Cluster");
    }

    #[tokio::test]
    async fn cluster_scan_survives_a_forbidden_marker_namespace() {
        let mock = mock();
        mock.add_object(&nodes(), node("ready", "True"));
        mock.fail_namespace(crate::bom::OPENSHIFT_MARKER_NAMESPACE, 403);

        let artifacts = list_artifacts(&mock, &ScanOptions::default()).await.unwrap();
        assert!(artifacts.iter().any(|a| a.kind == "Node"));
        assert_eq!(artifacts.last().unwrap().kind, "Cluster");
    }

    #[tokio::test]
    async fn single_artifact_lookup() {
        let mock = mock();
        mock.add_object(&pods(), pod("shop", "web", "nginx:1.14"));

        let artifact = get_artifact(&mock, Some("shop"), "Pod", "web").await.unwrap();
        assert_eq!(artifact.images, vec!["nginx:1.14"]);
        assert!(get_artifact(&mock, Some("shop"), "Pod", "missing")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
