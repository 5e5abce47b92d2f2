//! kube-survey - inventory the scannable artifacts of a Kubernetes cluster.
//!
//! This is the entry point for the `kube-survey` binary. Results are written
//! to stdout as JSON; logs go to stderr.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kube_survey::{Artifact, ClusterConfig, CollectorConfig, Inventory, NodeScan, ScanOptions};
use kube_survey_jobs::types::{parse_labels, parse_tolerations};
use kube_survey_jobs::{CommandSource, JobError};

/// kube-survey - inventory the scannable artifacts of a Kubernetes cluster.
#[derive(Parser, Debug)]
#[command(name = "kube-survey")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Kubeconfig file.
    #[arg(long, env = "KUBE_SURVEY_KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context.
    #[arg(long, env = "KUBE_SURVEY_CONTEXT", global = true)]
    context: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List workloads, cluster objects and nodes.
    Artifacts {
        #[command(flatten)]
        scan: ScanArgs,

        /// Run a collector job on every node and append its output.
        #[arg(long)]
        node_info: bool,

        #[command(flatten)]
        collector: NodeInfoArgs,
    },

    /// Print the cluster bill of materials.
    Bom {
        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Fetch one artifact.
    Get {
        /// Kind or plural, e.g. `deployment`.
        kind: String,

        /// Object name.
        name: String,

        /// Namespace of the object.
        #[arg(short, long, env = "KUBE_SURVEY_NAMESPACE")]
        namespace: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Only scan this namespace.
    #[arg(short, long, env = "KUBE_SURVEY_NAMESPACE")]
    namespace: Option<String>,

    /// Scan every namespace, skipping cluster-scoped resources.
    #[arg(short = 'A', long, env = "KUBE_SURVEY_ALL_NAMESPACES")]
    all_namespaces: bool,

    /// Resource kinds to scan instead of the default set.
    #[arg(long, env = "KUBE_SURVEY_KINDS", value_delimiter = ',')]
    kinds: Vec<String>,

    /// Drop objects owned by built-in workloads even with explicit kinds.
    #[arg(long, env = "KUBE_SURVEY_EXCLUDE_OWNED")]
    exclude_owned: bool,

    /// Keep only these kinds.
    #[arg(long, env = "KUBE_SURVEY_INCLUDE_KINDS", value_delimiter = ',')]
    include_kinds: Vec<String>,

    /// Drop these kinds.
    #[arg(long, env = "KUBE_SURVEY_EXCLUDE_KINDS", value_delimiter = ',')]
    exclude_kinds: Vec<String>,

    /// Keep only these namespaces.
    #[arg(long, env = "KUBE_SURVEY_INCLUDE_NAMESPACES", value_delimiter = ',')]
    include_namespaces: Vec<String>,

    /// Drop these namespaces.
    #[arg(long, env = "KUBE_SURVEY_EXCLUDE_NAMESPACES", value_delimiter = ',')]
    exclude_namespaces: Vec<String>,
}

impl From<ScanArgs> for ScanOptions {
    fn from(args: ScanArgs) -> Self {
        Self {
            namespace: args.namespace,
            all_namespaces: args.all_namespaces,
            kinds: args.kinds,
            exclude_owned: args.exclude_owned,
            include_kinds: args.include_kinds,
            exclude_kinds: args.exclude_kinds,
            include_namespaces: args.include_namespaces,
            exclude_namespaces: args.exclude_namespaces,
        }
    }
}

#[derive(Args, Debug)]
struct NodeInfoArgs {
    /// Namespace collector jobs run in.
    #[arg(
        long,
        env = "KUBE_SURVEY_COLLECTOR_NAMESPACE",
        default_value = kube_survey_jobs::types::DEFAULT_SCRATCH_NAMESPACE
    )]
    collector_namespace: String,

    /// Collector image.
    #[arg(long, env = "KUBE_SURVEY_COLLECTOR_IMAGE")]
    collector_image: Option<String>,

    /// Seconds to wait for each node.
    #[arg(long, env = "KUBE_SURVEY_COLLECTOR_TIMEOUT", default_value = "300")]
    collector_timeout: u64,

    /// Tolerations as `key=value:Effect[:Seconds]`, comma-separated.
    #[arg(long, env = "KUBE_SURVEY_COLLECTOR_TOLERATIONS")]
    tolerations: Option<String>,

    /// Skip nodes carrying all of these `key=value` labels.
    #[arg(long, env = "KUBE_SURVEY_COLLECTOR_IGNORE_LABELS")]
    ignore_labels: Option<String>,

    /// Directory holding `commands/kubernetes` and `commands/config`.
    #[arg(long, env = "KUBE_SURVEY_COMMANDS_DIR")]
    commands_dir: Option<PathBuf>,

    /// Command ids to run instead of the platform's set.
    #[arg(long, env = "KUBE_SURVEY_SPEC_COMMANDS", value_delimiter = ',')]
    spec_commands: Vec<String>,
}

impl TryFrom<NodeInfoArgs> for CollectorConfig {
    type Error = JobError;

    fn try_from(args: NodeInfoArgs) -> Result<Self, Self::Error> {
        Ok(Self {
            namespace: args.collector_namespace,
            image_ref: args.collector_image,
            timeout: Duration::from_secs(args.collector_timeout),
            tolerations: args
                .tolerations
                .as_deref()
                .map(parse_tolerations)
                .transpose()?
                .unwrap_or_default(),
            ignore_labels: args
                .ignore_labels
                .as_deref()
                .map(parse_labels)
                .transpose()?
                .unwrap_or_default(),
            command_source: args
                .commands_dir
                .map_or(CommandSource::Embedded, CommandSource::Directory),
            spec_command_ids: args.spec_commands,
            ..CollectorConfig::default()
        })
    }
}

/// Envelope of every result printed.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<T> {
    cluster_name: String,
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct BomReport {
    artifacts: Vec<Artifact>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kube_survey=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cluster = ClusterConfig {
        kubeconfig: cli.kubeconfig,
        context: cli.context,
    };

    match cli.command {
        Command::Artifacts {
            scan,
            node_info,
            collector,
        } => {
            let collector = CollectorConfig::try_from(collector)?;
            let inventory = Inventory::connect(&cluster, scan.into()).await?;
            let result = if node_info {
                inventory
                    .list_artifacts_and_node_info(collector)
                    .await?
            } else {
                NodeScan {
                    artifacts: inventory.list_artifacts().await?,
                    failures: Vec::new(),
                }
            };
            for failure in &result.failures {
                tracing::warn!(node = %failure.node, error = %failure.error, "Node not collected");
            }
            print_report(&inventory, result)?;
        }
        Command::Bom { scan } => {
            let inventory = Inventory::connect(&cluster, scan.into()).await?;
            let artifacts = inventory.list_cluster_bom().await?;
            print_report(&inventory, BomReport { artifacts })?;
        }
        Command::Get {
            kind,
            name,
            namespace,
        } => {
            let options = ScanOptions {
                namespace,
                ..ScanOptions::default()
            };
            let inventory = Inventory::connect(&cluster, options).await?;
            let artifact = inventory.get_artifact(&kind, &name).await?;
            print_report(&inventory, artifact)?;
        }
    }

    Ok(())
}

fn print_report<T: Serialize>(inventory: &Inventory, body: T) -> anyhow::Result<()> {
    let report = Report {
        cluster_name: inventory.cluster_name(),
        generated_at: Utc::now(),
        body,
    };
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &report)?;
    writeln!(stdout)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_info_args(tolerations: Option<&str>, ignore_labels: Option<&str>) -> NodeInfoArgs {
        NodeInfoArgs {
            collector_namespace: "scans".to_string(),
            collector_image: None,
            collector_timeout: 60,
            tolerations: tolerations.map(ToString::to_string),
            ignore_labels: ignore_labels.map(ToString::to_string),
            commands_dir: None,
            spec_commands: Vec::new(),
        }
    }

    #[test]
    fn collector_args_convert() {
        let config = CollectorConfig::try_from(node_info_args(
            Some("dedicated=scan:NoExecute:30"),
            Some("role=infra"),
        ))
        .unwrap();
        assert_eq!(config.namespace, "scans");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.tolerations[0].toleration_seconds, Some(30));
        assert_eq!(config.ignore_labels["role"], "infra");
    }

    #[test]
    fn malformed_collector_args_are_fatal() {
        assert!(CollectorConfig::try_from(node_info_args(Some("k=v:Bogus"), None)).is_err());
        assert!(CollectorConfig::try_from(node_info_args(None, Some("broken"))).is_err());
    }
}
