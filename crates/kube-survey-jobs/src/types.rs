//! Configuration types for node collection.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    Affinity, LocalObjectReference, PodSecurityContext, ResourceRequirements, SecurityContext,
    Toleration, Volume, VolumeMount,
};
use serde::{Deserialize, Serialize};

use kube_survey_cluster::types::split_list;

use crate::catalog::CommandSource;
use crate::error::{JobError, Result};
use crate::template::NODE_COLLECTOR_TEMPLATE;

/// Scratch namespace created for collector jobs when none is configured.
pub const DEFAULT_SCRATCH_NAMESPACE: &str = "kube-survey-temp";

/// How long a collection may take by default.
pub const DEFAULT_COLLECTOR_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Per-call configuration of the node collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Namespace collector jobs run in.
    pub namespace: String,
    /// Job template name.
    pub template: String,
    /// Job name used by `apply`; the template's name when unset.
    pub name: Option<String>,
    /// Collector image replacing the template's.
    pub image_ref: Option<String>,
    /// Service account for collector pods.
    pub service_account: Option<String>,
    /// Labels added to every job.
    pub labels: BTreeMap<String, String>,
    /// Annotations added to every pod.
    pub annotations: BTreeMap<String, String>,
    /// Pod tolerations.
    pub tolerations: Vec<Toleration>,
    /// Pod affinity.
    pub affinity: Option<Affinity>,
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
    /// Image pull secrets for collector pods.
    pub image_pull_secrets: Vec<LocalObjectReference>,
    /// Collector resource requirements replacing the template's.
    pub resource_requirements: Option<ResourceRequirements>,
    /// Nodes carrying every one of these labels are not collected.
    pub ignore_labels: BTreeMap<String, String>,
    /// Where node commands come from.
    pub command_source: CommandSource,
    /// Run exactly these command ids instead of the platform's set.
    pub spec_command_ids: Vec<String>,
    /// How long to wait for a collection job.
    pub timeout: Duration,
    /// Active deadline set on the job itself.
    pub job_timeout: Option<Duration>,
    /// Pin `apply` jobs by hostname selector instead of `nodeName`.
    pub use_node_selector: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_SCRATCH_NAMESPACE.to_string(),
            template: NODE_COLLECTOR_TEMPLATE.to_string(),
            name: None,
            image_ref: None,
            service_account: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            tolerations: Vec::new(),
            affinity: None,
            priority_class_name: None,
            pod_security_context: None,
            security_context: None,
            volumes: Vec::new(),
            volume_mounts: Vec::new(),
            image_pull_secrets: Vec::new(),
            resource_requirements: None,
            ignore_labels: BTreeMap::new(),
            command_source: CommandSource::Embedded,
            spec_command_ids: Vec::new(),
            timeout: DEFAULT_COLLECTOR_TIMEOUT,
            job_timeout: None,
            use_node_selector: false,
        }
    }
}

impl CollectorConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `KUBE_SURVEY_COLLECTOR_NAMESPACE`: scratch namespace
    /// - `KUBE_SURVEY_COLLECTOR_IMAGE`: collector image reference
    /// - `KUBE_SURVEY_COLLECTOR_SERVICE_ACCOUNT`: collector service account
    /// - `KUBE_SURVEY_COLLECTOR_PRIORITY_CLASS`: collector priority class
    /// - `KUBE_SURVEY_COLLECTOR_TIMEOUT`: wait timeout in seconds
    /// - `KUBE_SURVEY_COLLECTOR_TOLERATIONS`: `key=value:Effect[:Seconds]` list
    /// - `KUBE_SURVEY_COLLECTOR_IGNORE_LABELS`: `key=value` list of nodes to skip
    /// - `KUBE_SURVEY_COMMANDS_DIR`: command bundle directory
    /// - `KUBE_SURVEY_SPEC_COMMANDS`: command ids to run
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Config`] if the timeout, tolerations or ignore
    /// labels are malformed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("KUBE_SURVEY_COLLECTOR_NAMESPACE") {
            config.namespace = val;
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_COLLECTOR_IMAGE") {
            config.image_ref = Some(val);
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_COLLECTOR_SERVICE_ACCOUNT") {
            config.service_account = Some(val);
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_COLLECTOR_PRIORITY_CLASS") {
            config.priority_class_name = Some(val);
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_COLLECTOR_TIMEOUT") {
            let secs = val.trim().parse().map_err(|_| {
                JobError::Config(format!("timeout {val:?} is not a number of seconds"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_COLLECTOR_TOLERATIONS") {
            config.tolerations = parse_tolerations(&val)?;
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_COLLECTOR_IGNORE_LABELS") {
            config.ignore_labels = parse_labels(&val)?;
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_COMMANDS_DIR") {
            config.command_source = CommandSource::Directory(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_SPEC_COMMANDS") {
            config.spec_command_ids = split_list(&val);
        }

        Ok(config)
    }
}

/// Taint effects a toleration may name.
const TAINT_EFFECTS: &[&str] = &["NoSchedule", "PreferNoSchedule", "NoExecute"];

/// Parse `key=value` pairs separated by commas.
///
/// # Errors
///
/// Returns [`JobError::Config`] for a pair without `=` or with an empty key.
pub fn parse_labels(val: &str) -> Result<BTreeMap<String, String>> {
    split_list(val)
        .into_iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| JobError::Config(format!("label {pair:?} is not key=value")))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(JobError::Config(format!("label {pair:?} has no key")));
            }
            Ok((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parse tolerations of the form `key=value:Effect[:Seconds]`, separated by
/// commas.
///
/// The value may be left out (`key:Effect` or `key=:Effect`), which selects
/// the `Exists` operator; a value selects `Equal`.
///
/// # Errors
///
/// Returns [`JobError::Config`] when the key or effect is missing, the
/// effect is not a taint effect, or the seconds are not a number.
pub fn parse_tolerations(val: &str) -> Result<Vec<Toleration>> {
    split_list(val)
        .iter()
        .map(|entry| parse_toleration(entry))
        .collect()
}

fn parse_toleration(entry: &str) -> Result<Toleration> {
    let invalid = |reason: &str| JobError::Config(format!("toleration {entry:?} {reason}"));

    let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
    let (pair, effect, seconds) = match parts.as_slice() {
        [pair, effect] => (*pair, *effect, None),
        [pair, effect, seconds] => (*pair, *effect, Some(*seconds)),
        [_] => return Err(invalid("must include key and effect")),
        _ => return Err(invalid("has too many parts")),
    };
    if !TAINT_EFFECTS.contains(&effect) {
        return Err(invalid("has an invalid effect"));
    }

    let (key, value) = match pair.split_once('=') {
        Some((key, value)) => (key.trim(), value.trim()),
        None => (pair, ""),
    };
    if key.is_empty() {
        return Err(invalid("must include key and effect"));
    }

    let toleration_seconds = seconds
        .map(|s| s.parse::<i64>().map_err(|_| invalid("seconds must be a number")))
        .transpose()?;

    Ok(Toleration {
        key: Some(key.to_string()),
        operator: Some(if value.is_empty() { "Exists" } else { "Equal" }.to_string()),
        value: (!value.is_empty()).then(|| value.to_string()),
        effect: Some(effect.to_string()),
        toleration_seconds,
    })
}
