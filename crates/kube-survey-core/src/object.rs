//! Dynamically-typed cluster objects.
//!
//! The discovery pipeline handles many kinds, including ones it has no typed
//! model for. Objects are kept as a JSON tree and read through path accessors
//! that distinguish "absent" from "present with the wrong type".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Annotation written by `kubectl apply` holding the submitted manifest.
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// A cluster object of any kind, stored as its JSON representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawObject(Map<String, Value>);

/// The parts of an owner reference the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OwnerRef {
    /// Kind of the owning object.
    #[serde(default)]
    pub kind: String,
    /// Name of the owning object.
    #[serde(default)]
    pub name: String,
}

impl RawObject {
    /// Wrap a JSON value, which must be a map.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotAnObject` for any other JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(CoreError::NotAnObject),
        }
    }

    /// Serialize any value into a raw object.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or yields a non-map value.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self> {
        Self::from_value(serde_json::to_value(value)?)
    }

    /// Borrow the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert back into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Set a top-level field, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// The object's `kind`, or an empty string.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.0.get("kind").and_then(Value::as_str).unwrap_or_default()
    }

    /// The object's `apiVersion`, or an empty string.
    #[must_use]
    pub fn api_version(&self) -> &str {
        self.0
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// `metadata.name`, or an empty string.
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata_str("name")
    }

    /// `metadata.namespace`, or an empty string for cluster-scoped objects.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.metadata_str("namespace")
    }

    /// `metadata.uid`, or an empty string.
    #[must_use]
    pub fn uid(&self) -> &str {
        self.metadata_str("uid")
    }

    /// `metadata.labels`; entries with non-string values are dropped.
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map(&["metadata", "labels"])
    }

    /// `metadata.annotations`; entries with non-string values are dropped.
    #[must_use]
    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map(&["metadata", "annotations"])
    }

    /// A single annotation value.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.0
            .get("metadata")?
            .get("annotations")?
            .get(key)?
            .as_str()
    }

    /// `metadata.ownerReferences`; malformed entries are ignored.
    #[must_use]
    pub fn owner_references(&self) -> Vec<OwnerRef> {
        let Some(Value::Array(refs)) = self
            .0
            .get("metadata")
            .and_then(|m| m.get("ownerReferences"))
        else {
            return Vec::new();
        };
        refs.iter()
            .filter_map(|r| OwnerRef::deserialize(r).ok())
            .collect()
    }

    /// Walk a path of map keys.
    ///
    /// Returns `Ok(None)` when any segment is missing.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::FieldType` when an intermediate segment is not a map.
    pub fn nested(&self, path: &[&str]) -> Result<Option<&Value>> {
        let Some((first, rest)) = path.split_first() else {
            return Ok(None);
        };
        let mut current = match self.0.get(*first) {
            Some(v) => v,
            None => return Ok(None),
        };
        for (idx, key) in rest.iter().enumerate() {
            let Value::Object(map) = current else {
                return Err(CoreError::FieldType {
                    path: path[..=idx].join("."),
                    expected: "a map",
                });
            };
            current = match map.get(*key) {
                Some(v) => v,
                None => return Ok(None),
            };
        }
        Ok(Some(current))
    }

    /// Read a map at `path`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::FieldType` if the value is present but not a map.
    pub fn nested_map(&self, path: &[&str]) -> Result<Option<&Map<String, Value>>> {
        match self.nested(path)? {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(_) => Err(CoreError::FieldType {
                path: path.join("."),
                expected: "a map",
            }),
        }
    }

    /// Read a list at `path`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::FieldType` if the value is present but not a list.
    pub fn nested_slice(&self, path: &[&str]) -> Result<Option<&[Value]>> {
        match self.nested(path)? {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items.as_slice())),
            Some(_) => Err(CoreError::FieldType {
                path: path.join("."),
                expected: "a list",
            }),
        }
    }

    /// Read a string at `path`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::FieldType` if the value is present but not a string.
    pub fn nested_str(&self, path: &[&str]) -> Result<Option<&str>> {
        match self.nested(path)? {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(CoreError::FieldType {
                path: path.join("."),
                expected: "a string",
            }),
        }
    }

    fn metadata_str(&self, key: &str) -> &str {
        self.0
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    fn string_map(&self, path: &[&str]) -> BTreeMap<String, String> {
        let Ok(Some(map)) = self.nested_map(path) else {
            return BTreeMap::new();
        };
        map.iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect()
    }
}

impl TryFrom<Value> for RawObject {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<RawObject> for Value {
    fn from(object: RawObject) -> Self {
        object.into_value()
    }
}
