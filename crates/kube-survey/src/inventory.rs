//! The inventory facade over discovery, node collection and the cluster BOM.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use kube_survey_cluster::{bom, discovery, ClusterConfig, ClusterGateway, KubeGateway, ScanOptions};
use kube_survey_core::resource::KIND_NODE;
use kube_survey_core::{Artifact, RawObject};
use kube_survey_jobs::{CollectorConfig, NodeCollector};

use crate::error::{InventoryError, Result};

/// Kind of the artifacts carrying node collector output.
pub const KIND_NODE_INFO: &str = "NodeInfo";

/// Why collecting from one node failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    /// The node.
    pub node: String,
    /// Error message.
    pub error: String,
    /// Whether the collection ran out of time.
    #[serde(default)]
    pub timed_out: bool,
    /// Collector output read before the job was deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl NodeFailure {
    fn new(node: &str, error: &InventoryError) -> Self {
        let job_error = match error {
            InventoryError::Job(e) => Some(e),
            _ => None,
        };
        Self {
            node: node.to_string(),
            error: error.to_string(),
            timed_out: job_error.is_some_and(|e| e.is_timeout()),
            logs: job_error.and_then(|e| e.logs()).map(ToString::to_string),
        }
    }
}

/// Artifacts of a scan with node info, plus the nodes that could not be
/// collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeScan {
    /// Discovered artifacts followed by one `NodeInfo` artifact per collected node.
    pub artifacts: Vec<Artifact>,
    /// Per-node collection failures.
    #[serde(default)]
    pub failures: Vec<NodeFailure>,
}

/// Inventory of one cluster, scoped by [`ScanOptions`].
pub struct Inventory {
    gateway: Arc<dyn ClusterGateway>,
    options: ScanOptions,
}

impl Inventory {
    /// Create an inventory over an existing gateway.
    #[must_use]
    pub fn new(gateway: Arc<dyn ClusterGateway>, options: ScanOptions) -> Self {
        Self { gateway, options }
    }

    /// Connect to the cluster described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kubeconfig cannot be loaded or the client
    /// cannot be built.
    pub async fn connect(config: &ClusterConfig, options: ScanOptions) -> Result<Self> {
        let gateway = KubeGateway::new(config).await?;
        Ok(Self::new(Arc::new(gateway), options))
    }

    /// Get a reference to the scan options.
    #[must_use]
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Name of the cluster being inventoried.
    #[must_use]
    pub fn cluster_name(&self) -> String {
        self.gateway.cluster_name()
    }

    /// List every artifact the options cover.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails.
    pub async fn list_artifacts(&self) -> Result<Vec<Artifact>> {
        Ok(discovery::list_artifacts(self.gateway.as_ref(), &self.options).await?)
    }

    /// List artifacts and collect node info from every listed node.
    ///
    /// Nodes matched by the collector's ignore labels are skipped. A node that
    /// cannot be collected is reported in [`NodeScan::failures`] and does not
    /// stop the others.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails or the collector templates are
    /// invalid.
    pub async fn list_artifacts_and_node_info(&self, config: CollectorConfig) -> Result<NodeScan> {
        let mut artifacts = self.list_artifacts().await?;
        let nodes: Vec<_> = artifacts
            .iter()
            .filter(|a| a.kind == KIND_NODE)
            .map(|a| (a.name.clone(), a.labels.clone()))
            .collect();

        let collector = NodeCollector::new(Arc::clone(&self.gateway), config)?;
        let mut failures = Vec::new();
        let mut attempted = false;

        for (node, labels) in nodes {
            if collector.should_skip_node(&labels) {
                debug!(node = %node, "Skipping ignored node");
                continue;
            }
            attempted = true;
            match collect_node_info(&collector, &node).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    warn!(node = %node, error = %e, "Failed to collect node info");
                    failures.push(NodeFailure::new(&node, &e));
                }
            }
        }

        if attempted {
            collector.cleanup().await;
        }
        info!(
            artifacts = artifacts.len(),
            failed_nodes = failures.len(),
            "Finished node info collection"
        );
        Ok(NodeScan {
            artifacts,
            failures,
        })
    }

    /// The cluster bill of materials as artifacts.
    ///
    /// Components in namespaces the options filter out are dropped, and
    /// excluding the `node` kind drops the node records.
    ///
    /// # Errors
    ///
    /// Returns an error if nodes or the server version cannot be read.
    pub async fn list_cluster_bom(&self) -> Result<Vec<Artifact>> {
        Ok(bom::list_cluster_bom_artifacts(self.gateway.as_ref(), &self.options).await?)
    }

    /// Fetch one artifact by kind and name, in the scan's namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the kind is unknown or the object does not exist.
    pub async fn get_artifact(&self, kind: &str, name: &str) -> Result<Artifact> {
        let namespace = self.options.namespace.as_deref();
        Ok(discovery::get_artifact(self.gateway.as_ref(), namespace, kind, name).await?)
    }
}

async fn collect_node_info(collector: &NodeCollector, node: &str) -> Result<Artifact> {
    let output = collector.apply_and_collect(node).await?;
    let value: serde_json::Value = serde_json::from_str(&output)?;
    let raw = RawObject::from_value(value)?;
    Ok(Artifact::from_parts(KIND_NODE_INFO, "", node, raw))
}
