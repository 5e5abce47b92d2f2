//! Cluster access for kube-survey.
//!
//! This crate provides the [`ClusterGateway`] trait and its [`KubeGateway`]
//! implementation, plus everything built directly on top of cluster reads:
//!
//! - Resource resolution and listing of dynamically-typed objects
//! - Image pull credential resolution from service accounts and pull secrets
//! - The resource discovery pipeline that turns objects into artifacts
//! - The cluster bill-of-materials assembler
//! - Platform detection from the API server version
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Discovery Pipeline                           │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────────┐   │
//! │  │  Resolve    │ │   List &    │ │    Credential           │   │
//! │  │  Resources  │ │   Filter    │ │    Resolver             │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────────┘   │
//! │                         │                                       │
//! │               ┌─────────┴─────────┐                            │
//! │               ▼                   ▼                            │
//! │        ┌───────────┐       ┌───────────┐                       │
//! │        │ Artifact  │       │   BOM     │                       │
//! │        │ Extractor │       │ Assembler │                       │
//! │        └───────────┘       └───────────┘                       │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                ClusterGateway (KubeGateway / MockGateway)        │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Kubernetes API Server                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use kube_survey_cluster::{discovery, ClusterConfig, KubeGateway, ScanOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = KubeGateway::new(&ClusterConfig::default()).await?;
//!
//! let options = ScanOptions::with_namespace("default");
//! for artifact in discovery::list_artifacts(&gateway, &options).await? {
//!     println!("{}/{}: {:?}", artifact.kind, artifact.name, artifact.images);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! For testing without a real cluster, enable the `test-utils` feature and
//! use the in-memory gateway:
//!
//! ```ignore
//! use kube_survey_cluster::{discovery, MockGateway, ScanOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = MockGateway::new();
//! gateway.add_default_resources();
//!
//! let artifacts = discovery::list_artifacts(&gateway, &ScanOptions::default()).await?;
//! assert!(artifacts.iter().all(|a| a.kind != "Pod"));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bom;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod platform;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{ClusterError, Result};
pub use gateway::{ClusterGateway, KubeGateway, LogStream};
pub use platform::ClusterPlatform;
pub use types::{ClusterConfig, ScanOptions};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockGateway, MockJobOutcome};
