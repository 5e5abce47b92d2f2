//! Error types for the cluster crate.

use thiserror::Error;

use kube_survey_core::CoreError;

/// Errors that can occur while talking to the cluster.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// Watch stream error.
    #[error("Watch error: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    /// A kind or resource name is not served by the cluster.
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    /// An object could not be interpreted.
    #[error("Invalid object: {0}")]
    Object(#[from] CoreError),

    /// A pull secret holds an unreadable docker config.
    #[error("Invalid pull secret {namespace}/{name}: {source}")]
    InvalidSecret {
        /// Secret namespace.
        namespace: String,
        /// Secret name.
        name: String,
        /// What was wrong with it.
        source: CoreError,
    },

    /// Listing a resource failed for a reason other than not-found or forbidden.
    #[error("Failed listing {resource}: {source}")]
    List {
        /// The resource being listed.
        resource: String,
        /// The underlying error.
        source: Box<ClusterError>,
    },

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request construction error.
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    /// Client configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClusterError {
    /// The HTTP status of an API error, if this is one.
    #[must_use]
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Self::KubeApi(kube::Error::Api(e)) => Some(e.code),
            Self::List { source, .. } => source.api_code(),
            _ => None,
        }
    }

    /// Check if the API reported the object or resource as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// Check if the API refused access.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        self.api_code() == Some(403)
    }

    /// Check if a create collided with an existing object.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::KubeApi(kube::Error::Api(e)) => e.code == 429 || e.code >= 500,
            Self::KubeApi(_) | Self::Watch(_) => true,
            Self::List { source, .. } => source.is_retriable(),
            _ => false,
        }
    }
}

/// A specialized Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> ClusterError {
        crate::mock::api_error(code, "reason", "message")
    }

    #[test]
    fn classification() {
        assert!(api_error(404).is_not_found());
        assert!(api_error(403).is_forbidden());
        assert!(api_error(409).is_already_exists());
        assert!(api_error(503).is_retriable());
        assert!(!api_error(404).is_retriable());
        assert!(!ClusterError::UnknownResource("widgets".into()).is_retriable());
    }

    #[test]
    fn list_errors_keep_the_source_classification() {
        let err = ClusterError::List {
            resource: "pods".into(),
            source: Box::new(api_error(403)),
        };
        assert!(err.is_forbidden());
        assert!(err.to_string().contains("pods"));
    }
}
