//! Common error types for kube-survey.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while reading raw objects and credential payloads.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The value handed over as an object is not a JSON map.
    #[error("Object is not a map")]
    NotAnObject,

    /// A field exists but holds an unexpected type.
    #[error("Field {path} is not {expected}")]
    FieldType {
        /// Dotted path of the offending field.
        path: String,
        /// The type the accessor asked for.
        expected: &'static str,
    },

    /// An image reference could not be parsed.
    #[error("Invalid image reference {reference:?}: {reason}")]
    InvalidImageReference {
        /// The reference as written in the object.
        reference: String,
        /// Why parsing failed.
        reason: &'static str,
    },

    /// A docker config payload is malformed.
    #[error("Invalid docker config: {0}")]
    DockerConfig(String),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
