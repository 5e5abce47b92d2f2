//! Image pull credential resolution.
//!
//! A workload's credentials come from the pull secrets of its service account
//! followed by the pull secrets listed on its pod spec. Anything the caller
//! may not see or that no longer exists simply contributes nothing.

use k8s_openapi::api::core::v1::Secret;
use serde_json::Value;
use tracing::{debug, warn};

use kube_survey_core::credentials::{
    DOCKERCFG_KEY, DOCKER_CONFIG_JSON_KEY, SECRET_TYPE_DOCKERCFG, SECRET_TYPE_DOCKER_CONFIG_JSON,
};
use kube_survey_core::resource::{has_pod_template, pod_spec_path};
use kube_survey_core::{CredentialMap, DockerConfig, RawObject};

use crate::gateway::ClusterGateway;
use crate::{ClusterError, Result};

/// Service account used when a pod spec names none.
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Resolve the registry credentials available to an object's pods.
///
/// Objects without a pod template resolve to an empty map.
///
/// # Errors
///
/// Returns an error if the pod spec is malformed, a service account or secret
/// lookup fails for a reason other than not-found or forbidden, or a pull
/// secret holds an unreadable docker config.
pub async fn resolve_credentials(
    gateway: &dyn ClusterGateway,
    object: &RawObject,
) -> Result<CredentialMap> {
    let kind = object.kind();
    if !has_pod_template(kind) {
        return Ok(CredentialMap::new());
    }
    let Some(pod_spec) = object.nested_map(pod_spec_path(kind))? else {
        return Ok(CredentialMap::new());
    };

    let namespace = object.namespace();
    let service_account = pod_spec
        .get("serviceAccountName")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SERVICE_ACCOUNT);

    let mut secret_names = service_account_pull_secrets(gateway, namespace, service_account).await?;
    secret_names.extend(pod_spec_pull_secrets(pod_spec.get("imagePullSecrets")));

    let mut auths = CredentialMap::new();
    for name in secret_names {
        let secret = match gateway.get_secret(namespace, &name).await {
            Ok(secret) => secret,
            Err(e) if e.is_not_found() || e.is_forbidden() => {
                debug!(namespace, secret = %name, error = %e, "Skipping unreadable pull secret");
                continue;
            }
            Err(e) => return Err(e),
        };
        merge_secret(&mut auths, &secret).map_err(|source| ClusterError::InvalidSecret {
            namespace: namespace.to_string(),
            name: name.clone(),
            source,
        })?;
    }

    Ok(auths)
}

async fn service_account_pull_secrets(
    gateway: &dyn ClusterGateway,
    namespace: &str,
    name: &str,
) -> Result<Vec<String>> {
    match gateway.get_service_account(namespace, name).await {
        Ok(account) => Ok(account
            .image_pull_secrets
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.name)
            .filter(|n| !n.is_empty())
            .collect()),
        Err(e) if e.is_not_found() || e.is_forbidden() => {
            debug!(namespace, service_account = name, error = %e, "Service account unavailable");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

fn pod_spec_pull_secrets(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(refs)) = value else {
        return Vec::new();
    };
    refs.iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str))
        .filter(|n| !n.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Fold one secret into `auths`; secrets of other types or missing their
/// payload key are ignored.
///
/// # Errors
///
/// Returns an error if the docker config payload cannot be read.
pub fn merge_secret(
    auths: &mut CredentialMap,
    secret: &Secret,
) -> kube_survey_core::Result<()> {
    let (key, legacy) = match secret.type_.as_deref() {
        Some(SECRET_TYPE_DOCKER_CONFIG_JSON) => (DOCKER_CONFIG_JSON_KEY, false),
        Some(SECRET_TYPE_DOCKERCFG) => (DOCKERCFG_KEY, true),
        _ => return Ok(()),
    };
    let Some(payload) = secret.data.as_ref().and_then(|d| d.get(key)) else {
        warn!(
            secret = secret.metadata.name.as_deref().unwrap_or_default(),
            key, "Pull secret is missing its docker config"
        );
        return Ok(());
    };
    let config = DockerConfig::parse(&payload.0, legacy)?;
    auths.merge_docker_config(&config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGateway;
    use k8s_openapi::api::core::v1::{LocalObjectReference, ServiceAccount};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn meta(namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        }
    }

    fn docker_secret(namespace: &str, name: &str, host: &str, user: &str) -> Secret {
        let payload = json!({ "auths": { host: { "username": user, "password": "pw" } } });
        Secret {
            metadata: meta(namespace, name),
            type_: Some(SECRET_TYPE_DOCKER_CONFIG_JSON.to_string()),
            data: Some(BTreeMap::from([(
                DOCKER_CONFIG_JSON_KEY.to_string(),
                ByteString(payload.to_string().into_bytes()),
            )])),
            ..Secret::default()
        }
    }

    fn account(namespace: &str, name: &str, secrets: &[&str]) -> ServiceAccount {
        ServiceAccount {
            metadata: meta(namespace, name),
            image_pull_secrets: Some(
                secrets
                    .iter()
                    .map(|s| LocalObjectReference {
                        name: (*s).to_string(),
                    })
                    .collect(),
            ),
            ..ServiceAccount::default()
        }
    }

    fn deployment(pull_secrets: &[&str]) -> RawObject {
        let refs: Vec<Value> = pull_secrets.iter().map(|s| json!({ "name": s })).collect();
        RawObject::from_value(json!({
            "kind": "Deployment",
            "metadata": { "name": "web", "namespace": "shop" },
            "spec": { "template": { "spec": {
                "imagePullSecrets": refs,
                "containers": [{ "name": "web", "image": "quay.io/shop/web:1" }]
            }}}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn service_account_secrets_come_first_and_merge() {
        let mock = MockGateway::new();
        mock.add_service_account(account("shop", "default", &["sa-secret"]));
        mock.add_secret(docker_secret("shop", "sa-secret", "quay.io", "from-sa"));
        mock.add_secret(docker_secret("shop", "pod-secret", "https://quay.io/v1/", "from-pod"));

        let auths = resolve_credentials(&mock, &deployment(&["pod-secret"]))
            .await
            .unwrap();
        let quay = auths.get("quay.io").unwrap();
        assert_eq!(quay.username, "from-sa,from-pod");
        assert_eq!(quay.password, "pw,pw");
    }

    #[tokio::test]
    async fn missing_and_forbidden_lookups_yield_nothing() {
        let mock = MockGateway::new();
        mock.fail_service_account("shop", "default", 403);
        mock.fail_secret("shop", "hidden", 403);
        mock.add_secret(docker_secret("shop", "visible", "ghcr.io", "me"));

        let auths = resolve_credentials(&mock, &deployment(&["gone", "hidden", "visible"]))
            .await
            .unwrap();
        assert_eq!(auths.len(), 1);
        assert!(auths.get("ghcr.io").is_some());
    }

    #[tokio::test]
    async fn other_secret_errors_surface() {
        let mock = MockGateway::new();
        mock.fail_secret("shop", "flaky", 500);
        let err = resolve_credentials(&mock, &deployment(&["flaky"]))
            .await
            .unwrap_err();
        assert_eq!(err.api_code(), Some(500));
    }

    #[tokio::test]
    async fn objects_without_pod_templates_have_no_credentials() {
        let mock = MockGateway::new();
        let service = RawObject::from_value(json!({
            "kind": "Service",
            "metadata": { "name": "web", "namespace": "shop" }
        }))
        .unwrap();
        assert!(resolve_credentials(&mock, &service).await.unwrap().is_empty());
    }

    #[test]
    fn unrelated_and_incomplete_secrets_are_skipped() {
        let mut auths = CredentialMap::new();

        let opaque = Secret {
            type_: Some("Opaque".to_string()),
            ..Secret::default()
        };
        merge_secret(&mut auths, &opaque).unwrap();

        let empty = Secret {
            type_: Some(SECRET_TYPE_DOCKERCFG.to_string()),
            ..Secret::default()
        };
        merge_secret(&mut auths, &empty).unwrap();

        assert!(auths.is_empty());
    }

    #[test]
    fn legacy_secrets_are_read() {
        let mut auths = CredentialMap::new();
        let secret = Secret {
            type_: Some(SECRET_TYPE_DOCKERCFG.to_string()),
            data: Some(BTreeMap::from([(
                DOCKERCFG_KEY.to_string(),
                ByteString(br#"{"registry.local:5000":{"username":"u","password":"p"}}"#.to_vec()),
            )])),
            ..Secret::default()
        };
        merge_secret(&mut auths, &secret).unwrap();
        assert_eq!(auths.get("registry.local:5000").unwrap().username, "u");
    }
}
