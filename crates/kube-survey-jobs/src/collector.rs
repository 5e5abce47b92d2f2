//! Node collector: one short-lived job per node that reports host facts.
//!
//! Each collection ensures the scratch namespace, encodes the command catalog
//! and the node's kubelet `configz`, runs the job to completion and reads the
//! collector output. The job is deleted before control returns, and a
//! collection future dropped mid-flight schedules the delete in the
//! background.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use tracing::{debug, info, warn};

use kube_survey_cluster::platform::{detect_platform, DEFAULT_PLATFORM};
use kube_survey_cluster::ClusterGateway;

use crate::builder::{build_job, JobSpecParams};
use crate::catalog::{compress_and_encode, CollectorArgs, CommandCatalog};
use crate::logs::{logs_by_job_and_container, read_logs};
use crate::naming::{job_name, ObjectRef};
use crate::runner::{JobRun, JobRunner};
use crate::template::TemplateCatalog;
use crate::types::{CollectorConfig, DEFAULT_SCRATCH_NAMESPACE};
use crate::{JobError, Result};

/// Name of the collector container.
pub const NODE_COLLECTOR_NAME: &str = "node-collector";

/// Label naming the collector that created a job.
pub const COLLECTOR_NAME_LABEL: &str = "kube-survey.io/collector-name";

/// Label marking jobs created without an operator.
pub const AUTO_CREATED_LABEL: &str = "kube-survey.io/auto-created";

/// Label naming the node a job collects from.
pub const RESOURCE_NAME_LABEL: &str = "kube-survey.io/resource-name";

/// Label naming the kind of resource a job collects from.
pub const RESOURCE_KIND_LABEL: &str = "kube-survey.io/resource-kind";

/// How long to keep reading logs of a job that did not complete.
const LOG_GRACE: Duration = Duration::from_secs(10);

/// Runs collector jobs against cluster nodes.
pub struct NodeCollector {
    gateway: Arc<dyn ClusterGateway>,
    templates: TemplateCatalog,
    config: CollectorConfig,
}

impl NodeCollector {
    /// Create a collector using the embedded job templates.
    ///
    /// # Errors
    ///
    /// Returns an error if an embedded template is invalid.
    pub fn new(gateway: Arc<dyn ClusterGateway>, config: CollectorConfig) -> Result<Self> {
        Ok(Self::with_templates(
            gateway,
            TemplateCatalog::embedded()?,
            config,
        ))
    }

    /// Create a collector with a caller-supplied template catalog.
    #[must_use]
    pub fn with_templates(
        gateway: Arc<dyn ClusterGateway>,
        templates: TemplateCatalog,
        config: CollectorConfig,
    ) -> Self {
        Self {
            gateway,
            templates,
            config,
        }
    }

    /// Get a reference to the collector config.
    #[must_use]
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Add labels to every job created from now on.
    pub fn append_labels(&mut self, labels: impl IntoIterator<Item = (String, String)>) {
        self.config.labels.extend(labels);
    }

    /// Whether a node with `labels` is exempt from collection.
    ///
    /// Only a node carrying every configured ignore label is skipped.
    #[must_use]
    pub fn should_skip_node(&self, labels: &BTreeMap<String, String>) -> bool {
        let ignore = &self.config.ignore_labels;
        !ignore.is_empty() && ignore.iter().all(|(k, v)| labels.get(k) == Some(v))
    }

    /// Collect host facts from `node` and return the collector's output.
    ///
    /// # Errors
    ///
    /// Returns an error if the scratch namespace, command catalog or kubelet
    /// config cannot be prepared, or if the job is rejected. A job that fails,
    /// times out or whose logs cannot be read yields
    /// [`JobError::Collection`] carrying whatever output was read.
    pub async fn apply_and_collect(&self, node: &str) -> Result<String> {
        self.ensure_namespace().await?;
        let collector_args = self.collector_args().await?;
        let configz = self.gateway.node_configz(node).await?;

        let target = ObjectRef::node_info(node, &self.config.namespace);
        let params = JobSpecParams {
            name: Some(job_name(&self.config.template, &target)),
            node_name: node.to_string(),
            node_config: true,
            use_node_selector: true,
            kubelet_config: Some(compress_and_encode(&configz)?),
            collector_args,
            ..self.base_params(node)
        };
        let job = build_job(&self.templates, &params);

        let runner = JobRunner::new().with_timeout(self.config.timeout);
        let run = runner.submit(self.gateway.as_ref(), &job).await?;
        let cleanup = JobCleanup::new(Arc::clone(&self.gateway), &run);

        let outcome = runner.wait(self.gateway.as_ref(), &run).await;
        let logs = self.collector_logs(&run, outcome.is_err()).await;
        cleanup.delete().await;

        let collection_error = |logs: Option<String>, source: JobError| JobError::Collection {
            node: node.to_string(),
            logs,
            source: Box::new(source),
        };
        match (outcome, logs) {
            (Ok(()), Ok(logs)) => {
                info!(node, job = %run.name, bytes = logs.len(), "Collected node info");
                Ok(logs)
            }
            (Ok(()), Err(e)) => Err(collection_error(None, e)),
            (Err(e), logs) => Err(collection_error(logs.ok(), e)),
        }
    }

    /// Create a collector job for `node` without waiting for it.
    ///
    /// The job passes the node name instead of its kubelet config and is left
    /// for the caller to watch and delete.
    ///
    /// # Errors
    ///
    /// Returns an error if the command catalog cannot be prepared or the job
    /// is rejected.
    pub async fn apply(&self, node: &str) -> Result<Job> {
        let collector_args = self.collector_args().await?;
        let params = JobSpecParams {
            name: self.config.name.clone(),
            node_name: node.to_string(),
            replace_resources: true,
            use_node_selector: self.config.use_node_selector,
            collector_args,
            ..self.base_params(node)
        };
        let job = build_job(&self.templates, &params);
        let created = self.gateway.create_job(&job).await?;
        info!(
            node,
            namespace = created.metadata.namespace.as_deref().unwrap_or_default(),
            job = created.metadata.name.as_deref().unwrap_or_default(),
            "Applied collector job"
        );
        Ok(created)
    }

    /// Remove the scratch namespace if it is the default one.
    ///
    /// Caller-provided namespaces are left alone; errors are logged only.
    pub async fn cleanup(&self) {
        if self.config.namespace != DEFAULT_SCRATCH_NAMESPACE {
            return;
        }
        match self.gateway.delete_namespace(&self.config.namespace).await {
            Ok(()) => debug!(namespace = %self.config.namespace, "Deleted scratch namespace"),
            Err(e) => warn!(
                namespace = %self.config.namespace,
                error = %e,
                "Failed to delete scratch namespace"
            ),
        }
    }

    async fn ensure_namespace(&self) -> Result<()> {
        let namespace = &self.config.namespace;
        if self.gateway.namespace_exists(namespace).await? {
            return Ok(());
        }
        match self.gateway.create_namespace(namespace).await {
            Ok(()) => {
                info!(namespace = %namespace, "Created scratch namespace");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Encoded commands for the configured ids, or for the cluster's platform.
    async fn collector_args(&self) -> Result<CollectorArgs> {
        let catalog = CommandCatalog::load(&self.config.command_source)?;
        if !self.config.spec_command_ids.is_empty() {
            return catalog.collector_args(DEFAULT_PLATFORM, &self.config.spec_command_ids);
        }
        let platform = detect_platform(self.gateway.as_ref()).await?;
        debug!(%platform, "Selecting node commands by platform");
        catalog.collector_args(&platform.name, &[])
    }

    fn base_params(&self, node: &str) -> JobSpecParams {
        let config = &self.config;
        let mut labels = config.labels.clone();
        labels.extend([
            (COLLECTOR_NAME_LABEL.to_string(), NODE_COLLECTOR_NAME.to_string()),
            (AUTO_CREATED_LABEL.to_string(), "true".to_string()),
            (RESOURCE_NAME_LABEL.to_string(), node.to_string()),
            (RESOURCE_KIND_LABEL.to_string(), "Node".to_string()),
        ]);
        JobSpecParams {
            template: config.template.clone(),
            namespace: config.namespace.clone(),
            image_ref: config.image_ref.clone(),
            service_account: config.service_account.clone(),
            labels,
            annotations: config.annotations.clone(),
            affinity: config.affinity.clone(),
            tolerations: config.tolerations.clone(),
            priority_class_name: config.priority_class_name.clone(),
            pod_security_context: config.pod_security_context.clone(),
            security_context: config.security_context.clone(),
            volumes: config.volumes.clone(),
            volume_mounts: config.volume_mounts.clone(),
            image_pull_secrets: config.image_pull_secrets.clone(),
            resource_requirements: config.resource_requirements.clone().unwrap_or_default(),
            replace_resources: config.resource_requirements.is_some(),
            timeout: config.job_timeout,
            ..JobSpecParams::default()
        }
    }

    async fn collector_logs(&self, run: &JobRun, unsettled: bool) -> Result<String> {
        let read = async {
            let stream =
                logs_by_job_and_container(self.gateway.as_ref(), run, NODE_COLLECTOR_NAME).await?;
            read_logs(stream).await
        };
        if unsettled {
            // a hung container never closes its followed log stream
            tokio::time::timeout(LOG_GRACE, read)
                .await
                .map_err(|_| JobError::Timeout)?
        } else {
            read.await
        }
    }
}

/// Deletes a submitted job once, either explicitly or when dropped.
struct JobCleanup {
    gateway: Arc<dyn ClusterGateway>,
    run: Option<JobRun>,
}

impl JobCleanup {
    fn new(gateway: Arc<dyn ClusterGateway>, run: &JobRun) -> Self {
        Self {
            gateway,
            run: Some(run.clone()),
        }
    }

    async fn delete(mut self) {
        if let Some(run) = self.run.take() {
            delete_job(self.gateway.as_ref(), &run).await;
        }
    }
}

impl Drop for JobCleanup {
    fn drop(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(job = %run.name, "No runtime to delete abandoned job");
            return;
        };
        let gateway = Arc::clone(&self.gateway);
        debug!(job = %run.name, "Deleting abandoned job in the background");
        handle.spawn(async move {
            delete_job(gateway.as_ref(), &run).await;
        });
    }
}

async fn delete_job(gateway: &dyn ClusterGateway, run: &JobRun) {
    match gateway.delete_job(&run.namespace, &run.name).await {
        Ok(()) => debug!(namespace = %run.namespace, job = %run.name, "Deleted job"),
        Err(e) => debug!(
            namespace = %run.namespace,
            job = %run.name,
            error = %e,
            "Ignoring job delete failure"
        ),
    }
}
