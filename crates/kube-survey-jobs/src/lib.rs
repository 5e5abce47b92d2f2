//! Short-lived node collector jobs for kube-survey.
//!
//! This crate turns a named Job template into a concrete job, runs it on a
//! cluster node and reads back what it printed:
//!
//! - Template catalog and the pure job builder
//! - Event-driven runner racing job status and warning events against a deadline
//! - Pod lookup, log streaming and terminated container statuses
//! - The node command catalog passed to the collector
//! - The node collector tying them together with guaranteed job cleanup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        NodeCollector                             │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────────┐   │
//! │  │  Command    │ │  Template   │ │    Job Builder          │   │
//! │  │  Catalog    │ │  Catalog    │ │    (pure)               │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────────┘   │
//! │                         │                                       │
//! │               ┌─────────┴─────────┐                            │
//! │               ▼                   ▼                            │
//! │        ┌───────────┐       ┌───────────┐                       │
//! │        │ JobRunner │       │   Log     │                       │
//! │        │ (watches) │       │  Reader   │                       │
//! │        └───────────┘       └───────────┘                       │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                ClusterGateway (KubeGateway / MockGateway)        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kube_survey_cluster::{ClusterConfig, KubeGateway};
//! use kube_survey_jobs::{CollectorConfig, NodeCollector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Arc::new(KubeGateway::new(&ClusterConfig::default()).await?);
//! let collector = NodeCollector::new(gateway, CollectorConfig::from_env()?)?;
//!
//! let output = collector.apply_and_collect("worker-1").await?;
//! println!("{output}");
//!
//! collector.cleanup().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! The runner and collector work against any gateway; the in-memory gateway
//! from `kube-survey-cluster` scripts job outcomes per node:
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use kube_survey_cluster::{MockGateway, MockJobOutcome};
//! use kube_survey_jobs::{CollectorConfig, NodeCollector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Arc::new(MockGateway::new());
//! gateway.set_configz("worker-1", "{}");
//! gateway.script_node("worker-1", MockJobOutcome::Hang);
//!
//! let collector = NodeCollector::new(gateway.clone(), CollectorConfig::default())?;
//! assert!(collector.apply_and_collect("worker-1").await.is_err());
//! assert_eq!(gateway.job_count(), 0);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod builder;
pub mod catalog;
pub mod collector;
pub mod completion;
pub mod error;
pub mod logs;
pub mod naming;
pub mod runner;
pub mod template;
pub mod types;

pub use builder::{build_job, JobSpecParams};
pub use catalog::{CollectorArgs, CommandCatalog, CommandSource};
pub use collector::NodeCollector;
pub use completion::RunOutcome;
pub use error::{JobError, Result};
pub use naming::{job_name, ObjectRef};
pub use runner::{JobRun, JobRunner};
pub use template::TemplateCatalog;
pub use types::CollectorConfig;
