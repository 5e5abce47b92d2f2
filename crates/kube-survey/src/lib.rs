//! Kubernetes artifact inventory.
//!
//! [`Inventory`] is the public surface over the workspace: it lists the
//! scannable artifacts of a cluster, optionally collects host facts from every
//! node through short-lived collector jobs, and assembles the cluster bill of
//! materials.
//!
//! # Example
//!
//! ```no_run
//! use kube_survey::{CollectorConfig, Inventory};
//! use kube_survey_cluster::{ClusterConfig, ScanOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let inventory = Inventory::connect(&ClusterConfig::from_env(), ScanOptions::default()).await?;
//!
//! let scan = inventory
//!     .list_artifacts_and_node_info(CollectorConfig::from_env()?)
//!     .await?;
//! for failure in &scan.failures {
//!     eprintln!("{}: {}", failure.node, failure.error);
//! }
//! println!("{} artifacts", scan.artifacts.len());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod inventory;

pub use error::{InventoryError, Result};
pub use inventory::{Inventory, NodeFailure, NodeScan, KIND_NODE_INFO};

pub use kube_survey_cluster::{ClusterConfig, ScanOptions};
pub use kube_survey_core::Artifact;
pub use kube_survey_jobs::CollectorConfig;
