//! Deterministic job names.

use serde::{Deserialize, Serialize};

/// Kind recorded for node collection targets.
pub const NODE_INFO_TARGET_KIND: &str = "Node-Info";

/// Hex characters of the hash kept in a job name.
const HASH_LEN: usize = 10;

/// The object a job works on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Target kind.
    pub kind: String,
    /// Target name.
    pub name: String,
    /// Namespace the job runs in.
    pub namespace: String,
}

impl ObjectRef {
    /// The collection target for a node.
    #[must_use]
    pub fn node_info(node: &str, namespace: &str) -> Self {
        Self {
            kind: NODE_INFO_TARGET_KIND.to_string(),
            name: node.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

/// Name a job `<template>-<hash>` from its template and target.
///
/// The same inputs always give the same name.
#[must_use]
pub fn job_name(template: &str, target: &ObjectRef) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [
        template,
        target.kind.as_str(),
        target.name.as_str(),
        target.namespace.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    let digest = hex::encode(hasher.finalize().as_bytes());
    format!("{template}-{}", &digest[..HASH_LEN])
}
