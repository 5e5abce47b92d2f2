//! Configuration types for the cluster crate.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How to reach the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Kubeconfig file; the usual inference chain applies when unset.
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context; the current context when unset.
    pub context: Option<String>,
}

impl ClusterConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `KUBE_SURVEY_KUBECONFIG`: kubeconfig file path
    /// - `KUBE_SURVEY_CONTEXT`: kubeconfig context name
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("KUBE_SURVEY_KUBECONFIG") {
            config.kubeconfig = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_CONTEXT") {
            config.context = Some(val);
        }

        config
    }
}

/// What a discovery scan covers and which objects it keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Restrict namespaced resources to this namespace.
    pub namespace: Option<String>,
    /// Scan every namespace but skip cluster-scoped resources.
    pub all_namespaces: bool,
    /// Resource kinds or plurals to scan instead of the default set.
    pub kinds: Vec<String>,
    /// Drop objects owned by built-in workloads even when kinds are explicit.
    pub exclude_owned: bool,
    /// Keep only these kinds.
    pub include_kinds: Vec<String>,
    /// Drop these kinds.
    pub exclude_kinds: Vec<String>,
    /// Keep only these namespaces.
    pub include_namespaces: Vec<String>,
    /// Drop these namespaces.
    pub exclude_namespaces: Vec<String>,
}

impl ScanOptions {
    /// Options scanning a single namespace.
    #[must_use]
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    /// Whether the scan is limited to namespaced resources.
    #[must_use]
    pub fn is_namespaced(&self) -> bool {
        self.namespace.as_deref().is_some_and(|ns| !ns.is_empty()) || self.all_namespaces
    }

    /// Load options from environment variables.
    ///
    /// Supported environment variables (lists are comma-separated):
    /// - `KUBE_SURVEY_NAMESPACE`
    /// - `KUBE_SURVEY_ALL_NAMESPACES`: `true` or `1`
    /// - `KUBE_SURVEY_KINDS`
    /// - `KUBE_SURVEY_EXCLUDE_OWNED`: `true` or `1`
    /// - `KUBE_SURVEY_INCLUDE_KINDS`, `KUBE_SURVEY_EXCLUDE_KINDS`
    /// - `KUBE_SURVEY_INCLUDE_NAMESPACES`, `KUBE_SURVEY_EXCLUDE_NAMESPACES`
    #[must_use]
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(val) = std::env::var("KUBE_SURVEY_NAMESPACE") {
            options.namespace = Some(val);
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_ALL_NAMESPACES") {
            options.all_namespaces = parse_flag(&val);
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_KINDS") {
            options.kinds = split_list(&val);
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_EXCLUDE_OWNED") {
            options.exclude_owned = parse_flag(&val);
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_INCLUDE_KINDS") {
            options.include_kinds = split_list(&val);
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_EXCLUDE_KINDS") {
            options.exclude_kinds = split_list(&val);
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_INCLUDE_NAMESPACES") {
            options.include_namespaces = split_list(&val);
        }
        if let Ok(val) = std::env::var("KUBE_SURVEY_EXCLUDE_NAMESPACES") {
            options.exclude_namespaces = split_list(&val);
        }

        options
    }
}

/// Parse a boolean environment flag.
#[must_use]
pub fn parse_flag(val: &str) -> bool {
    matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

/// Split a comma-separated list, dropping blanks.
#[must_use]
pub fn split_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
