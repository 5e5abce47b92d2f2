//! Named job manifest templates.
//!
//! Templates are full `batch/v1` Job manifests keyed by `metadata.name`. The
//! embedded set is compiled into the binary; tests and callers with their own
//! manifests can build a catalog from any document set.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use serde_yaml::Value;
use tracing::debug;

use crate::{JobError, Result};

/// Template name of the node collector job.
pub const NODE_COLLECTOR_TEMPLATE: &str = "node-collector";

const EMBEDDED_TEMPLATES: &[&str] = &[include_str!("../templates/node-collector.yaml")];

/// Job templates keyed by name.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, Job>,
}

impl TemplateCatalog {
    /// Load the templates shipped with the crate.
    ///
    /// # Errors
    ///
    /// Returns an error if an embedded template is not a valid Job manifest.
    pub fn embedded() -> Result<Self> {
        Self::from_documents(EMBEDDED_TEMPLATES.iter().copied())
    }

    /// Build a catalog from manifest documents.
    ///
    /// Documents without `metadata.name` are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a named document is not a valid Job manifest.
    pub fn from_documents<'a>(documents: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut templates = BTreeMap::new();
        for document in documents {
            let value: Value = serde_yaml::from_str(document)?;
            let Some(name) = value
                .get("metadata")
                .and_then(|m| m.get("name"))
                .and_then(Value::as_str)
                .map(ToString::to_string)
            else {
                debug!("Skipping template without a name");
                continue;
            };
            let job: Job = serde_yaml::from_value(value)
                .map_err(|e| JobError::Template(format!("{name}: {e}")))?;
            templates.insert(name, job);
        }
        Ok(Self { templates })
    }

    /// The named template, or an empty job when the name is unknown.
    #[must_use]
    pub fn template(&self, name: &str) -> Job {
        self.templates.get(name).cloned().unwrap_or_default()
    }

    /// Whether a template with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Template names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}
