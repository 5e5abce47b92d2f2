//! Error types for the inventory facade.

use thiserror::Error;

use kube_survey_cluster::ClusterError;
use kube_survey_core::CoreError;
use kube_survey_jobs::JobError;

/// Errors that can occur while taking an inventory.
#[derive(Error, Debug)]
pub enum InventoryError {
    /// Cluster access or discovery error.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Node collector error.
    #[error(transparent)]
    Job(#[from] JobError),

    /// An object could not be turned into an artifact.
    #[error(transparent)]
    Object(#[from] CoreError),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InventoryError {
    /// Check if the error means the requested object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Cluster(e) if e.is_not_found())
    }
}

/// A specialized Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
