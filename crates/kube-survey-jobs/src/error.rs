//! Error types for the jobs crate.

use thiserror::Error;

use kube_survey_cluster::ClusterError;

/// Errors that can occur while running collector jobs.
#[derive(Error, Debug)]
pub enum JobError {
    /// The job reported a `Failed` condition.
    #[error("Job failed: {reason}: {message}")]
    Failed {
        /// Condition reason.
        reason: String,
        /// Condition message.
        message: String,
    },

    /// A warning event was recorded against the job.
    #[error("Warning event received: {message} ({reason})")]
    WarningEvent {
        /// Event reason.
        reason: String,
        /// Event message.
        message: String,
    },

    /// The job did not finish before its deadline.
    #[error("Job timed out")]
    Timeout,

    /// Both watch streams ended before the job finished.
    #[error("Job watch closed before completion")]
    WatchClosed,

    /// No pod is controlled by the job.
    #[error("Pod for job {namespace}/{name} not found")]
    PodNotFound {
        /// Job namespace.
        namespace: String,
        /// Job name.
        name: String,
    },

    /// Collecting from a node failed; whatever the collector printed is kept.
    #[error("Collecting from node {node}: {source}")]
    Collection {
        /// The node being collected.
        node: String,
        /// Collector output read before the job was deleted.
        logs: Option<String>,
        /// Why the run failed.
        source: Box<JobError>,
    },

    /// No node commands match the requested ids or the cluster platform.
    #[error("No node commands found")]
    NoCommands,

    /// A config file the collector needs is missing from the command bundle.
    #[error("Missing command config: {0}")]
    MissingConfig(String),

    /// A collector setting could not be parsed.
    #[error("Invalid collector config: {0}")]
    Config(String),

    /// A job template could not be read.
    #[error("Invalid template: {0}")]
    Template(String),

    /// Cluster access error.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// YAML error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// Check if the job ran out of time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Collection { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Check if the job itself reported failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        match self {
            Self::Failed { .. } | Self::WarningEvent { .. } => true,
            Self::Collection { source, .. } => source.is_failure(),
            _ => false,
        }
    }

    /// Collector output attached to a failed collection.
    #[must_use]
    pub fn logs(&self) -> Option<&str> {
        match self {
            Self::Collection { logs, .. } => logs.as_deref(),
            _ => None,
        }
    }
}

/// A specialized Result type for job operations.
pub type Result<T> = std::result::Result<T, JobError>;
