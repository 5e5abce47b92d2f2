//! Pod lookup, log streaming and terminal container statuses for jobs.

use std::collections::BTreeMap;

use futures::AsyncReadExt;
use k8s_openapi::api::core::v1::{ContainerStateTerminated, ContainerStatus, Pod};
use tracing::debug;

use kube_survey_cluster::{ClusterGateway, LogStream};

use crate::runner::JobRun;
use crate::{JobError, Result};

/// Selector label a job stamps on its pods.
pub const CONTROLLER_UID_LABEL: &str = "controller-uid";

/// Prefixed selector label used from Kubernetes 1.27.
pub const BATCH_CONTROLLER_UID_LABEL: &str = "batch.kubernetes.io/controller-uid";

/// Find the first pod controlled by a job.
///
/// The job is fetched again so the selector reflects what the controller set.
///
/// # Errors
///
/// Returns an error if the job or its pods cannot be read.
pub async fn pod_by_job(gateway: &dyn ClusterGateway, run: &JobRun) -> Result<Option<Pod>> {
    let job = gateway.get_job(&run.namespace, &run.name).await?;
    let match_labels = job
        .spec
        .as_ref()
        .and_then(|s| s.selector.as_ref())
        .and_then(|s| s.match_labels.as_ref());
    let lookup = |key: &str| {
        match_labels
            .and_then(|l| l.get(key))
            .filter(|v| !v.is_empty())
            .map(|v| format!("{key}={v}"))
    };
    let selector = lookup(CONTROLLER_UID_LABEL)
        .or_else(|| lookup(BATCH_CONTROLLER_UID_LABEL))
        .unwrap_or_else(|| format!("{BATCH_CONTROLLER_UID_LABEL}="));

    debug!(job = %run.name, %selector, "Looking up job pod");
    let pods = gateway.list_pods(&run.namespace, &selector).await?;
    Ok(pods.into_iter().next())
}

/// Follow the logs of one container of the job's pod.
///
/// # Errors
///
/// Returns [`JobError::PodNotFound`] if the job controls no pod, or an error
/// if the lookup or log request fails.
pub async fn logs_by_job_and_container(
    gateway: &dyn ClusterGateway,
    run: &JobRun,
    container: &str,
) -> Result<LogStream> {
    let pod = pod_by_job(gateway, run)
        .await?
        .ok_or_else(|| JobError::PodNotFound {
            namespace: run.namespace.clone(),
            name: run.name.clone(),
        })?;
    let pod_name = pod.metadata.name.unwrap_or_default();
    Ok(gateway
        .stream_pod_logs(&run.namespace, &pod_name, container)
        .await?)
}

/// Read a log stream to the end.
///
/// # Errors
///
/// Returns an error if the stream fails or is not valid UTF-8.
pub async fn read_logs(mut stream: LogStream) -> Result<String> {
    let mut output = String::new();
    stream.read_to_string(&mut output).await?;
    Ok(output)
}

/// Terminal states of the job pod's init and regular containers, by name.
///
/// A job without a pod has no statuses.
///
/// # Errors
///
/// Returns an error if the job or its pods cannot be read.
pub async fn terminated_statuses_by_job(
    gateway: &dyn ClusterGateway,
    run: &JobRun,
) -> Result<BTreeMap<String, ContainerStateTerminated>> {
    let pod = pod_by_job(gateway, run).await?;
    Ok(terminated_statuses_by_pod(pod.as_ref()))
}

/// Terminal states of a pod's init and regular containers, by name.
#[must_use]
pub fn terminated_statuses_by_pod(pod: Option<&Pod>) -> BTreeMap<String, ContainerStateTerminated> {
    let Some(status) = pod.and_then(|p| p.status.as_ref()) else {
        return BTreeMap::new();
    };
    let statuses: [&[ContainerStatus]; 2] = [
        status.init_container_statuses.as_deref().unwrap_or_default(),
        status.container_statuses.as_deref().unwrap_or_default(),
    ];
    statuses
        .into_iter()
        .flatten()
        .filter_map(|s| {
            let terminated = s.state.as_ref()?.terminated.clone()?;
            Some((s.name.clone(), terminated))
        })
        .collect()
}
