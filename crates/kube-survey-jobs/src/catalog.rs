//! Node collector command catalog.
//!
//! A command bundle has two parts:
//!
//! - `commands/kubernetes/*.yaml`: one YAML list per file whose first entry
//!   is a command map carrying an `id` and the `platforms` it applies to
//! - `commands/config/*.yaml`: config blobs handed to the collector verbatim,
//!   of which `kubelet_mapping.yaml` and `node.yaml` are required
//!
//! The bundle is either compiled in or read from a directory of the same
//! shape. Everything passed to the collector is bzip2-compressed and base64
//! encoded.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::debug;

use kube_survey_cluster::platform::DEFAULT_PLATFORM;

use crate::{JobError, Result};

/// Directory of command documents inside a bundle.
pub const COMMANDS_DIR: &str = "commands/kubernetes";

/// Directory of config blobs inside a bundle.
pub const CONFIG_DIR: &str = "commands/config";

/// Kubelet config mapping blob.
pub const KUBELET_MAPPING_FILE: &str = "kubelet_mapping.yaml";

/// Node config blob.
pub const NODE_CONFIG_FILE: &str = "node.yaml";

const EMBEDDED_COMMANDS: &[&str] = &[
    include_str!("../commands/kubernetes/apiserver_spec_permissions.yaml"),
    include_str!("../commands/kubernetes/apiserver_spec_ownership.yaml"),
    include_str!("../commands/kubernetes/kubelet_conf_permissions.yaml"),
    include_str!("../commands/kubernetes/kubelet_conf_ownership.yaml"),
    include_str!("../commands/kubernetes/etcd_data_directory_permissions.yaml"),
];

const EMBEDDED_CONFIGS: &[(&str, &str)] = &[
    (
        KUBELET_MAPPING_FILE,
        include_str!("../commands/config/kubelet_mapping.yaml"),
    ),
    (NODE_CONFIG_FILE, include_str!("../commands/config/node.yaml")),
];

/// Where command documents come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandSource {
    /// The bundle compiled into the crate.
    #[default]
    Embedded,
    /// A directory holding `commands/kubernetes` and `commands/config`.
    Directory(PathBuf),
}

/// Encoded arguments for the node collector container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorArgs {
    /// Selected commands as `{commands: [...]}`.
    pub node_commands: String,
    /// The kubelet config mapping blob.
    pub kubelet_config_mapping: String,
    /// The node config blob.
    pub node_config_data: String,
}

#[derive(Serialize)]
struct NodeCommands<'a> {
    commands: &'a [Value],
}

/// Loaded command documents and config blobs.
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    commands: Vec<Value>,
    configs: BTreeMap<String, Vec<u8>>,
}

impl CommandCatalog {
    /// Load the bundle compiled into the crate.
    ///
    /// # Errors
    ///
    /// Returns an error if an embedded document is not valid YAML.
    pub fn embedded() -> Result<Self> {
        Self::from_documents(EMBEDDED_COMMANDS.iter().copied(), EMBEDDED_CONFIGS.iter().copied())
    }

    /// Load a bundle from `root/commands`.
    ///
    /// Only `.yaml` files are read, in file name order.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or file cannot be read or a command
    /// document is not valid YAML.
    pub fn from_dir(root: &Path) -> Result<Self> {
        let mut catalog = Self::default();
        for path in yaml_files(&root.join(COMMANDS_DIR))? {
            let document = std::fs::read_to_string(&path)?;
            catalog.add_command_document(&document)?;
        }
        for path in yaml_files(&root.join(CONFIG_DIR))? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let data = std::fs::read(&path)?;
            catalog.configs.insert(name.to_string(), data);
        }
        debug!(
            root = %root.display(),
            commands = catalog.commands.len(),
            configs = catalog.configs.len(),
            "Loaded command bundle"
        );
        Ok(catalog)
    }

    /// Build a catalog from command documents and named config blobs.
    ///
    /// # Errors
    ///
    /// Returns an error if a command document is not valid YAML.
    pub fn from_documents<'a>(
        commands: impl IntoIterator<Item = &'a str>,
        configs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        let mut catalog = Self::default();
        for document in commands {
            catalog.add_command_document(document)?;
        }
        catalog.configs = configs
            .into_iter()
            .map(|(name, data)| (name.to_string(), data.as_bytes().to_vec()))
            .collect();
        Ok(catalog)
    }

    /// Load the catalog a source points at.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be read.
    pub fn load(source: &CommandSource) -> Result<Self> {
        match source {
            CommandSource::Embedded => Self::embedded(),
            CommandSource::Directory(root) => Self::from_dir(root),
        }
    }

    fn add_command_document(&mut self, document: &str) -> Result<()> {
        let value: Value = serde_yaml::from_str(document)?;
        match value.as_sequence().and_then(|s| s.first()) {
            Some(command) if command.is_mapping() => self.commands.push(command.clone()),
            _ => debug!("Skipping command document without a command map"),
        }
        Ok(())
    }

    /// Commands grouped by each platform they list.
    #[must_use]
    pub fn by_platform(&self) -> BTreeMap<String, Vec<Value>> {
        let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for command in &self.commands {
            let platforms = command.get("platforms").and_then(Value::as_sequence);
            for platform in platforms.into_iter().flatten().filter_map(Value::as_str) {
                grouped
                    .entry(platform.to_string())
                    .or_default()
                    .push(command.clone());
            }
        }
        grouped
    }

    /// Commands grouped by id.
    #[must_use]
    pub fn by_id(&self) -> BTreeMap<String, Vec<Value>> {
        let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for command in &self.commands {
            if let Some(id) = command.get("id").and_then(Value::as_str) {
                grouped.entry(id.to_string()).or_default().push(command.clone());
            }
        }
        grouped
    }

    /// The commands to run: those with the given ids when any are given,
    /// otherwise those for `platform`, falling back to the vanilla set when
    /// the platform has none.
    #[must_use]
    pub fn select(&self, platform: &str, spec_ids: &[String]) -> Vec<Value> {
        if !spec_ids.is_empty() {
            let by_id = self.by_id();
            return spec_ids
                .iter()
                .filter_map(|id| by_id.get(id))
                .flatten()
                .cloned()
                .collect();
        }
        let mut by_platform = self.by_platform();
        by_platform
            .remove(platform)
            .or_else(|| by_platform.remove(DEFAULT_PLATFORM))
            .unwrap_or_default()
    }

    /// Encode the selected commands and required config blobs for the collector.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is selected or a required config blob is
    /// missing.
    pub fn collector_args(&self, platform: &str, spec_ids: &[String]) -> Result<CollectorArgs> {
        let commands = self.select(platform, spec_ids);
        if commands.is_empty() {
            return Err(JobError::NoCommands);
        }
        let document = serde_yaml::to_string(&NodeCommands {
            commands: &commands,
        })?;
        Ok(CollectorArgs {
            node_commands: compress_and_encode(document.as_bytes())?,
            kubelet_config_mapping: self.encoded_config(KUBELET_MAPPING_FILE)?,
            node_config_data: self.encoded_config(NODE_CONFIG_FILE)?,
        })
    }

    fn encoded_config(&self, name: &str) -> Result<String> {
        let data = self
            .configs
            .get(name)
            .ok_or_else(|| JobError::MissingConfig(name.to_string()))?;
        compress_and_encode(data)
    }
}

fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "yaml") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Compress with bzip2 and encode as standard base64.
///
/// # Errors
///
/// Returns an error if compression fails.
pub fn compress_and_encode(data: &[u8]) -> Result<String> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}
