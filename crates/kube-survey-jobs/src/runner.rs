//! Event-driven job execution.
//!
//! A submitted job is watched by two observers running side by side: one
//! follows the job's status conditions, the other follows warning events
//! recorded against it. Whichever decides first settles the run through a
//! [`completion_signal`]; a deadline races the signal.
//!
//! ```text
//! submit ──► Submitted ──► Watching ──┬──► Completed
//!                                     ├──► Failed (condition or warning event)
//!                                     └──► TimedOut
//! ```
//!
//! The runner never deletes the job. Watch tasks are aborted on every exit
//! path, including when the waiting future is dropped.

use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Event;
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use kube_survey_cluster::{ClusterGateway, Result as ClusterResult};

use crate::completion::{completion_signal, CompletionSender, RunOutcome};
use crate::logs::terminated_statuses_by_job;
use crate::{JobError, Result};

/// Handle of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    /// Job name.
    pub name: String,
    /// Job namespace.
    pub namespace: String,
    /// Server-assigned uid.
    pub uid: String,
}

impl JobRun {
    /// Handle for a job as returned by the API server.
    #[must_use]
    pub fn from_job(job: &Job) -> Self {
        Self {
            name: job.metadata.name.clone().unwrap_or_default(),
            namespace: job.metadata.namespace.clone().unwrap_or_default(),
            uid: job.metadata.uid.clone().unwrap_or_default(),
        }
    }
}

/// Submits jobs and waits for them to settle.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobRunner {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl JobRunner {
    /// A runner that waits without a deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up `timeout` after waiting starts. A zero timeout waits forever.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    /// Give up at `deadline`; takes precedence over a timeout.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Create the job.
    ///
    /// # Errors
    ///
    /// Returns an error if the API server rejects the job.
    pub async fn submit(&self, gateway: &dyn ClusterGateway, job: &Job) -> Result<JobRun> {
        let created = gateway.create_job(job).await?;
        let run = JobRun::from_job(&created);
        info!(namespace = %run.namespace, job = %run.name, uid = %run.uid, "Submitted job");
        Ok(run)
    }

    /// Wait for a submitted job to complete, fail or run out of time.
    ///
    /// On failure or timeout the terminated containers of the job's pod are
    /// logged; problems doing so do not change the result.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Failed`] or [`JobError::WarningEvent`] when the job
    /// fails, [`JobError::Timeout`] when the deadline passes first, and
    /// [`JobError::WatchClosed`] if both watches end without a decision.
    pub async fn wait(&self, gateway: &dyn ClusterGateway, run: &JobRun) -> Result<()> {
        let (tx, rx) = completion_signal();
        let observers = ObserverTasks(vec![
            tokio::spawn(observe_job_status(
                gateway.watch_jobs(&run.namespace),
                run.uid.clone(),
                tx.clone(),
            ))
            .abort_handle(),
            tokio::spawn(observe_events(
                gateway.watch_events(&run.namespace),
                run.uid.clone(),
                tx,
            ))
            .abort_handle(),
        ]);

        let deadline = self
            .deadline
            .or_else(|| self.timeout.map(|t| Instant::now() + t));
        let outcome = match deadline {
            Some(deadline) => {
                debug!(job = %run.name, "Waiting for job with deadline");
                tokio::time::timeout_at(deadline, rx.wait())
                    .await
                    .map_err(|_| JobError::Timeout)
            }
            None => Ok(rx.wait().await),
        };
        drop(observers);

        let result = match outcome {
            Ok(Some(RunOutcome::Completed)) => {
                info!(job = %run.name, "Job completed");
                return Ok(());
            }
            Ok(Some(RunOutcome::Failed { reason, message })) => {
                Err(JobError::Failed { reason, message })
            }
            Ok(Some(RunOutcome::Warning { reason, message })) => {
                Err(JobError::WarningEvent { reason, message })
            }
            Ok(None) => Err(JobError::WatchClosed),
            Err(timeout) => Err(timeout),
        };
        if let Err(e) = &result {
            warn!(job = %run.name, error = %e, "Job did not complete");
        }
        log_terminated_containers(gateway, run).await;
        result
    }
}

struct ObserverTasks(Vec<AbortHandle>);

impl Drop for ObserverTasks {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// The outcome a job's conditions decide, if any.
///
/// The first `Complete` or `Failed` condition that is true settles it.
#[must_use]
pub fn outcome_from_job(job: &Job) -> Option<RunOutcome> {
    let conditions = job.status.as_ref()?.conditions.as_ref()?;
    conditions
        .iter()
        .filter(|c| c.status != "False")
        .find_map(|c| match c.type_.as_str() {
            "Complete" => Some(RunOutcome::Completed),
            "Failed" => Some(RunOutcome::Failed {
                reason: c.reason.clone().unwrap_or_default(),
                message: c.message.clone().unwrap_or_default(),
            }),
            _ => None,
        })
}

/// The outcome an event decides, if any: warnings about the job fail it.
#[must_use]
pub fn outcome_from_event(event: &Event, uid: &str) -> Option<RunOutcome> {
    if event.involved_object.uid.as_deref() != Some(uid) {
        return None;
    }
    match event.type_.as_deref() {
        Some("Warning") => Some(RunOutcome::Warning {
            reason: event.reason.clone().unwrap_or_default(),
            message: event.message.clone().unwrap_or_default(),
        }),
        _ => {
            debug!(
                reason = event.reason.as_deref().unwrap_or_default(),
                message = event.message.as_deref().unwrap_or_default(),
                "Job event"
            );
            None
        }
    }
}

async fn observe_job_status(
    mut jobs: BoxStream<'static, ClusterResult<Job>>,
    uid: String,
    tx: CompletionSender,
) {
    while let Some(item) = jobs.next().await {
        match item {
            Ok(job) if job.metadata.uid.as_deref() == Some(uid.as_str()) => {
                if let Some(outcome) = outcome_from_job(&job) {
                    debug!(?outcome, "Job status settled the run");
                    tx.complete(outcome);
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Job watch error"),
        }
    }
}

async fn observe_events(
    mut events: BoxStream<'static, ClusterResult<Event>>,
    uid: String,
    tx: CompletionSender,
) {
    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                if let Some(outcome) = outcome_from_event(&event, &uid) {
                    debug!(?outcome, "Job event settled the run");
                    tx.complete(outcome);
                    return;
                }
            }
            Err(e) => warn!(error = %e, "Event watch error"),
        }
    }
}

async fn log_terminated_containers(gateway: &dyn ClusterGateway, run: &JobRun) {
    let statuses = match terminated_statuses_by_job(gateway, run).await {
        Ok(statuses) => statuses,
        Err(e) => {
            error!(
                job = %format!("{}/{}", run.namespace, run.name),
                error = %e,
                "Failed to read terminated container statuses"
            );
            return;
        }
    };
    for (container, status) in statuses.iter().filter(|(_, s)| s.exit_code != 0) {
        error!(
            container = %container,
            exit_code = status.exit_code,
            reason = status.reason.as_deref().unwrap_or_default(),
            message = status.message.as_deref().unwrap_or_default(),
            "Container terminated with an error"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_job, JobSpecParams};
    use crate::template::{TemplateCatalog, NODE_COLLECTOR_TEMPLATE};
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::api::core::v1::ObjectReference;
    use kube_survey_cluster::{MockGateway, MockJobOutcome};

    fn job_for(node: &str) -> Job {
        let params = JobSpecParams {
            template: NODE_COLLECTOR_TEMPLATE.to_string(),
            namespace: "scratch".to_string(),
            name: Some(format!("collect-{node}")),
            node_name: node.to_string(),
            ..JobSpecParams::default()
        };
        build_job(&TemplateCatalog::embedded().unwrap(), &params)
    }

    async fn run_on(mock: &MockGateway, runner: JobRunner, node: &str) -> Result<()> {
        let run = runner.submit(mock, &job_for(node)).await?;
        runner.wait(mock, &run).await
    }

    #[tokio::test]
    async fn completes() {
        let mock = MockGateway::new();
        let runner = JobRunner::new().with_timeout(Duration::from_secs(30));
        run_on(&mock, runner, "node-1").await.unwrap();
        // the runner leaves deletion to its caller
        assert_eq!(mock.job_count(), 1);
    }

    #[tokio::test]
    async fn failed_condition_carries_reason_and_message() {
        let mock = MockGateway::new();
        mock.script_node(
            "node-1",
            MockJobOutcome::Fail {
                reason: "BackoffLimitExceeded".into(),
                message: "Job has reached the specified backoff limit".into(),
            },
        );
        let err = run_on(&mock, JobRunner::new(), "node-1").await.unwrap_err();
        assert!(err.is_failure());
        match err {
            JobError::Failed { reason, message } => {
                assert_eq!(reason, "BackoffLimitExceeded");
                assert_eq!(message, "Job has reached the specified backoff limit");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn warning_events_fail_immediately() {
        let mock = MockGateway::new();
        mock.script_node(
            "node-1",
            MockJobOutcome::Warning {
                reason: "FailedCreate".into(),
                message: "quota exceeded".into(),
            },
        );
        let err = run_on(&mock, JobRunner::new(), "node-1").await.unwrap_err();
        assert!(matches!(err, JobError::WarningEvent { ref reason, .. } if reason == "FailedCreate"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_distinct_from_failure() {
        let mock = MockGateway::new();
        mock.script_node("node-1", MockJobOutcome::Hang);
        let runner = JobRunner::new().with_timeout(Duration::from_secs(5));
        let err = run_on(&mock, runner, "node-1").await.unwrap_err();
        assert!(err.is_timeout());
        assert!(!err.is_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_deadline_wins_over_timeout() {
        let mock = MockGateway::new();
        mock.script_node(
            "node-1",
            MockJobOutcome::CompleteAfter(Duration::from_secs(10)),
        );
        let runner = JobRunner::new()
            .with_timeout(Duration::from_secs(60))
            .with_deadline(Instant::now() + Duration::from_secs(1));
        let err = run_on(&mock, runner, "node-1").await.unwrap_err();
        assert!(err.is_timeout());

        let mock = MockGateway::new();
        mock.script_node(
            "node-1",
            MockJobOutcome::CompleteAfter(Duration::from_secs(10)),
        );
        let runner = JobRunner::new().with_timeout(Duration::from_secs(60));
        run_on(&mock, runner, "node-1").await.unwrap();
    }

    #[tokio::test]
    async fn rejected_jobs_fail_at_submission() {
        let mock = MockGateway::new();
        let params = JobSpecParams {
            template: "missing".to_string(),
            namespace: "scratch".to_string(),
            name: Some("empty".to_string()),
            ..JobSpecParams::default()
        };
        let job = build_job(&TemplateCatalog::embedded().unwrap(), &params);
        let err = JobRunner::new().submit(&mock, &job).await.unwrap_err();
        assert!(matches!(err, JobError::Cluster(_)));
        assert_eq!(mock.job_count(), 0);
    }

    #[test]
    fn conditions_decide_in_order() {
        let condition = |type_: &str, status: &str| JobCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: Some("R".to_string()),
            ..JobCondition::default()
        };
        let job = |conditions| Job {
            status: Some(JobStatus {
                conditions: Some(conditions),
                ..JobStatus::default()
            }),
            ..Job::default()
        };

        assert_eq!(outcome_from_job(&Job::default()), None);
        assert_eq!(
            outcome_from_job(&job(vec![condition("Suspended", "True")])),
            None
        );
        assert_eq!(
            outcome_from_job(&job(vec![
                condition("SuccessCriteriaMet", "True"),
                condition("Complete", "True"),
            ])),
            Some(RunOutcome::Completed)
        );
        assert!(matches!(
            outcome_from_job(&job(vec![condition("Failed", "True"), condition("Complete", "True")])),
            Some(RunOutcome::Failed { .. })
        ));
    }

    #[test]
    fn events_only_count_for_their_job() {
        let event = |uid: &str, type_: &str| Event {
            type_: Some(type_.to_string()),
            reason: Some("BackOff".to_string()),
            involved_object: ObjectReference {
                uid: Some(uid.to_string()),
                ..ObjectReference::default()
            },
            ..Event::default()
        };
        assert_eq!(outcome_from_event(&event("other", "Warning"), "mine"), None);
        assert_eq!(outcome_from_event(&event("mine", "Normal"), "mine"), None);
        assert!(matches!(
            outcome_from_event(&event("mine", "Warning"), "mine"),
            Some(RunOutcome::Warning { .. })
        ));
    }
}
