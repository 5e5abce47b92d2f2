//! Job construction from a template and per-run parameters.
//!
//! [`build_job`] is a pure function: the template catalog is only read and
//! the same parameters always produce the same job.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Affinity, Container, LocalObjectReference, PodSecurityContext, PodSpec, ResourceRequirements,
    SecurityContext, Toleration, Volume, VolumeMount,
};

use crate::catalog::CollectorArgs;
use crate::template::TemplateCatalog;

/// Node selector label pinning a pod to one host.
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Everything that varies between two collector jobs.
#[derive(Debug, Clone, Default)]
pub struct JobSpecParams {
    /// Template name.
    pub template: String,
    /// Namespace the job is created in.
    pub namespace: String,
    /// Job name; the template's name is kept when unset.
    pub name: Option<String>,
    /// Node the job runs on.
    pub node_name: String,
    /// Collector image replacing the template's.
    pub image_ref: Option<String>,
    /// Service account for the pod.
    pub service_account: Option<String>,
    /// Labels added to the job.
    pub labels: BTreeMap<String, String>,
    /// Annotations added to the pod template.
    pub annotations: BTreeMap<String, String>,
    /// Pod affinity.
    pub affinity: Option<Affinity>,
    /// Pod tolerations.
    pub tolerations: Vec<Toleration>,
    /// Pod priority class.
    pub priority_class_name: Option<String>,
    /// Pod security context.
    pub pod_security_context: Option<PodSecurityContext>,
    /// Collector container security context.
    pub security_context: Option<SecurityContext>,
    /// Pod volumes replacing the template's.
    pub volumes: Vec<Volume>,
    /// Collector volume mounts replacing the template's.
    pub volume_mounts: Vec<VolumeMount>,
    /// Image pull secrets for the pod.
    pub image_pull_secrets: Vec<LocalObjectReference>,
    /// Collector resource requirements, applied when `replace_resources` is set.
    pub resource_requirements: ResourceRequirements,
    /// Replace the template's resource requirements.
    pub replace_resources: bool,
    /// Active deadline for the job.
    pub timeout: Option<Duration>,
    /// Collect the node's kubelet config; otherwise the node name is passed.
    pub node_config: bool,
    /// Pin by hostname node selector instead of `nodeName`.
    pub use_node_selector: bool,
    /// Encoded kubelet `configz` document.
    pub kubelet_config: Option<String>,
    /// Encoded command catalog arguments.
    pub collector_args: CollectorArgs,
}

/// Build the job described by `params` from its template.
///
/// An unknown template yields a job with only metadata set; the API server
/// rejects it on submission.
#[must_use]
pub fn build_job(catalog: &TemplateCatalog, params: &JobSpecParams) -> Job {
    let mut job = catalog.template(&params.template);

    job.metadata.namespace = Some(params.namespace.clone());
    if let Some(name) = params.name.as_ref().filter(|n| !n.is_empty()) {
        job.metadata.name = Some(name.clone());
    }
    if !params.labels.is_empty() {
        job.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(params.labels.clone());
    }

    let Some(spec) = job.spec.as_mut() else {
        return job;
    };
    if let Some(timeout) = params.timeout.filter(|t| !t.is_zero()) {
        spec.active_deadline_seconds = Some(i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX));
    }
    if !params.annotations.is_empty() {
        spec.template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(params.annotations.clone());
    }
    if let Some(pod) = spec.template.spec.as_mut() {
        apply_pod_params(pod, params);
    }
    job
}

fn apply_pod_params(pod: &mut PodSpec, params: &JobSpecParams) {
    if params.use_node_selector {
        pod.node_selector = Some(BTreeMap::from([(
            HOSTNAME_LABEL.to_string(),
            params.node_name.clone(),
        )]));
    } else if !params.node_name.is_empty() {
        pod.node_name = Some(params.node_name.clone());
    }
    if let Some(account) = params.service_account.as_ref().filter(|a| !a.is_empty()) {
        pod.service_account_name = Some(account.clone());
    }
    if params.affinity.is_some() {
        pod.affinity.clone_from(&params.affinity);
    }
    if !params.tolerations.is_empty() {
        pod.tolerations = Some(params.tolerations.clone());
    }
    if let Some(class) = params.priority_class_name.as_ref().filter(|c| !c.is_empty()) {
        pod.priority_class_name = Some(class.clone());
    }
    if params.pod_security_context.is_some() {
        pod.security_context.clone_from(&params.pod_security_context);
    }
    if !params.volumes.is_empty() {
        pod.volumes = Some(params.volumes.clone());
    }
    if !params.image_pull_secrets.is_empty() {
        pod.image_pull_secrets = Some(params.image_pull_secrets.clone());
    }
    if let Some(container) = pod.containers.first_mut() {
        apply_container_params(container, params);
    }
}

fn apply_container_params(container: &mut Container, params: &JobSpecParams) {
    if let Some(image) = params.image_ref.as_ref().filter(|i| !i.is_empty()) {
        container.image = Some(image.clone());
    }

    let args = container.args.get_or_insert_with(Vec::new);
    if params.node_config {
        if let Some(config) = params.kubelet_config.as_ref().filter(|c| !c.is_empty()) {
            args.extend(["--kubelet-config".to_string(), config.clone()]);
        }
    } else {
        args.extend(["--node".to_string(), params.node_name.clone()]);
    }
    let collector = &params.collector_args;
    for (flag, value) in [
        ("--node-config", &collector.node_config_data),
        ("--kubelet-config-mapping", &collector.kubelet_config_mapping),
        ("--node-commands", &collector.node_commands),
    ] {
        if !value.is_empty() {
            args.extend([flag.to_string(), value.clone()]);
        }
    }

    if params.security_context.is_some() {
        container.security_context.clone_from(&params.security_context);
    }
    if params.replace_resources {
        container.resources = Some(params.resource_requirements.clone());
    }
    if !params.volume_mounts.is_empty() {
        container.volume_mounts = Some(params.volume_mounts.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::NODE_COLLECTOR_TEMPLATE;
    use k8s_openapi::api::core::v1::Capabilities;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn catalog() -> TemplateCatalog {
        TemplateCatalog::embedded().unwrap()
    }

    fn params() -> JobSpecParams {
        JobSpecParams {
            template: NODE_COLLECTOR_TEMPLATE.to_string(),
            namespace: "kube-survey-temp".to_string(),
            node_name: "node-1".to_string(),
            ..JobSpecParams::default()
        }
    }

    fn pod(job: &Job) -> &PodSpec {
        job.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    fn args(job: &Job) -> Vec<String> {
        pod(job).containers[0].args.clone().unwrap_or_default()
    }

    #[test]
    fn namespace_is_always_set() {
        let catalog = catalog();
        for template in [NODE_COLLECTOR_TEMPLATE, "unknown"] {
            let params = JobSpecParams {
                template: template.to_string(),
                ..params()
            };
            let job = build_job(&catalog, &params);
            assert_eq!(job.metadata.namespace.as_deref(), Some("kube-survey-temp"));
        }
    }

    #[test]
    fn building_is_pure() {
        let catalog = catalog();
        let params = JobSpecParams {
            labels: BTreeMap::from([("a".to_string(), "b".to_string())]),
            ..params()
        };
        assert_eq!(build_job(&catalog, &params), build_job(&catalog, &params));
        assert!(catalog.template(NODE_COLLECTOR_TEMPLATE).metadata.labels.is_none());
    }

    #[test]
    fn unknown_templates_build_an_empty_job() {
        let params = JobSpecParams {
            template: "missing".to_string(),
            name: Some("named".to_string()),
            ..params()
        };
        let job = build_job(&catalog(), &params);
        assert!(job.spec.is_none());
        assert_eq!(job.metadata.name.as_deref(), Some("named"));
    }

    #[test]
    fn node_targeting() {
        let catalog = catalog();
        let by_name = build_job(&catalog, &params());
        assert_eq!(pod(&by_name).node_name.as_deref(), Some("node-1"));
        assert!(pod(&by_name).node_selector.is_none());

        let by_selector = build_job(
            &catalog,
            &JobSpecParams {
                use_node_selector: true,
                ..params()
            },
        );
        assert!(pod(&by_selector).node_name.is_none());
        assert_eq!(
            pod(&by_selector).node_selector.as_ref().unwrap()[HOSTNAME_LABEL],
            "node-1"
        );
    }

    #[test]
    fn collector_arguments() {
        let catalog = catalog();

        let without_config = build_job(&catalog, &params());
        assert_eq!(args(&without_config), ["k8s", "--node", "node-1"]);

        let with_config = build_job(
            &catalog,
            &JobSpecParams {
                node_config: true,
                kubelet_config: Some("KCFG".to_string()),
                collector_args: CollectorArgs {
                    node_commands: "CMDS".to_string(),
                    kubelet_config_mapping: "MAP".to_string(),
                    node_config_data: "NODE".to_string(),
                },
                ..params()
            },
        );
        assert_eq!(
            args(&with_config),
            [
                "k8s",
                "--kubelet-config",
                "KCFG",
                "--node-config",
                "NODE",
                "--kubelet-config-mapping",
                "MAP",
                "--node-commands",
                "CMDS"
            ]
        );
    }

    #[test]
    fn metadata_merges_are_additive() {
        let params = JobSpecParams {
            name: Some("node-collector-abc".to_string()),
            labels: BTreeMap::from([("team".to_string(), "sec".to_string())]),
            annotations: BTreeMap::from([("note".to_string(), "x".to_string())]),
            ..params()
        };
        let job = build_job(&catalog(), &params);
        assert_eq!(job.metadata.name.as_deref(), Some("node-collector-abc"));
        assert_eq!(job.metadata.labels.as_ref().unwrap()["team"], "sec");

        let template = &job.spec.as_ref().unwrap().template;
        let meta = template.metadata.as_ref().unwrap();
        assert_eq!(meta.annotations.as_ref().unwrap()["note"], "x");
        assert_eq!(meta.labels.as_ref().unwrap()["app"], "node-collector");
    }

    #[test]
    fn pod_overrides() {
        let params = JobSpecParams {
            image_ref: Some("registry.local/node-collector:1".to_string()),
            service_account: Some("collector".to_string()),
            priority_class_name: Some("system-node-critical".to_string()),
            tolerations: vec![Toleration {
                key: Some("dedicated".to_string()),
                operator: Some("Exists".to_string()),
                ..Toleration::default()
            }],
            security_context: Some(SecurityContext {
                capabilities: Some(Capabilities {
                    drop: Some(vec!["ALL".to_string()]),
                    ..Capabilities::default()
                }),
                ..SecurityContext::default()
            }),
            image_pull_secrets: vec![LocalObjectReference {
                name: "pull".to_string(),
            }],
            timeout: Some(Duration::from_secs(300)),
            ..params()
        };
        let job = build_job(&catalog(), &params);
        let spec = pod(&job);
        assert_eq!(
            spec.containers[0].image.as_deref(),
            Some("registry.local/node-collector:1")
        );
        assert_eq!(spec.service_account_name.as_deref(), Some("collector"));
        assert_eq!(spec.priority_class_name.as_deref(), Some("system-node-critical"));
        assert_eq!(spec.tolerations.as_ref().unwrap().len(), 1);
        assert_eq!(spec.image_pull_secrets.as_ref().unwrap()[0].name, "pull");
        assert_eq!(
            spec.containers[0]
                .security_context
                .as_ref()
                .unwrap()
                .capabilities
                .as_ref()
                .unwrap()
                .drop,
            Some(vec!["ALL".to_string()])
        );
        assert_eq!(job.spec.as_ref().unwrap().active_deadline_seconds, Some(300));
        // untouched template fields survive
        assert_eq!(spec.volumes.as_ref().unwrap().len(), 8);
    }

    #[test]
    fn resources_are_replaced_only_on_request() {
        let catalog = catalog();
        let requirements = ResourceRequirements {
            limits: Some(BTreeMap::from([(
                "cpu".to_string(),
                Quantity("500m".to_string()),
            )])),
            ..ResourceRequirements::default()
        };

        let kept = build_job(
            &catalog,
            &JobSpecParams {
                resource_requirements: requirements.clone(),
                ..params()
            },
        );
        let template_limits = pod(&kept).containers[0].resources.as_ref().unwrap();
        assert_eq!(template_limits.limits.as_ref().unwrap()["cpu"].0, "100m");

        let replaced = build_job(
            &catalog,
            &JobSpecParams {
                resource_requirements: requirements.clone(),
                replace_resources: true,
                ..params()
            },
        );
        assert_eq!(pod(&replaced).containers[0].resources, Some(requirements));
    }
}
