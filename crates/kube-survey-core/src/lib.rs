//! Core data model for kube-survey.
//!
//! This crate provides the cluster-independent types shared by the discovery
//! pipeline and the node collector:
//!
//! - **Raw objects**: dynamically-typed cluster objects with validated path accessors
//! - **Artifacts**: the normalized unit of scannable output
//! - **Credentials**: registry credential maps built from docker config payloads
//! - **Resource identities**: group/version/resource triples and scope rules
//! - **BOM records**: component and node inventory snapshots
//!
//! # Example
//!
//! ```
//! use kube_survey_core::{Artifact, CredentialMap, RawObject};
//! use serde_json::json;
//!
//! let pod = RawObject::from_value(json!({
//!     "kind": "Pod",
//!     "metadata": { "name": "web", "namespace": "default" },
//!     "spec": { "containers": [{ "name": "web", "image": "nginx:1.14" }] }
//! }))
//! .unwrap();
//!
//! let artifact = Artifact::from_object(pod, &CredentialMap::default()).unwrap();
//! assert_eq!(artifact.images, vec!["nginx:1.14".to_string()]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod artifact;
pub mod bom;
pub mod credentials;
pub mod error;
pub mod image;
pub mod object;
pub mod resource;

pub use artifact::Artifact;
pub use bom::{BomContainer, BomResult, Component, NodeInfo};
pub use credentials::{CredentialMap, DockerConfig, RegistryAuth};
pub use error::{CoreError, Result};
pub use image::ImageReference;
pub use object::{OwnerRef, RawObject};
pub use resource::ResourceIdentity;
