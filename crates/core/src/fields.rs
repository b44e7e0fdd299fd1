//! Flattened fields
//!
//! Hyperparameters and metrics are stored as dotted leaves
//! (`metrics.loss`, `hparams.optim.lr`) so a partial report overwrites only
//! the leaves it names. [`FieldValue`] is the tagged (scalar | map) view used
//! to flatten incoming maps and rebuild nested maps from stored leaves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;

/// A field value: either a leaf or a nested map of fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Nested map of named fields
    Map(BTreeMap<String, FieldValue>),
    /// Leaf value (numbers, strings, booleans, null, arrays)
    Scalar(Value),
}

impl FieldValue {
    /// Check if this is a leaf
    pub fn is_scalar(&self) -> bool {
        matches!(self, FieldValue::Scalar(_))
    }

    /// Convert back into a plain JSON value
    pub fn into_value(self) -> Value {
        match self {
            FieldValue::Scalar(v) => v,
            FieldValue::Map(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, v.into_value()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => FieldValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, FieldValue::from(v)))
                    .collect(),
            ),
            other => FieldValue::Scalar(other),
        }
    }
}

impl From<Document> for FieldValue {
    fn from(doc: Document) -> Self {
        FieldValue::from(Value::Object(doc))
    }
}

/// Flatten `value` under `prefix` into dotted leaves of `out`
///
/// A scalar at the top produces a single `prefix` leaf. Empty maps produce
/// no leaves, so they never clobber stored siblings.
pub fn flatten_into(out: &mut Document, prefix: &str, value: &FieldValue) {
    match value {
        FieldValue::Scalar(v) => {
            out.insert(prefix.to_string(), v.clone());
        }
        FieldValue::Map(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(out, &path, child);
            }
        }
    }
}

/// Flatten a map of fields under `prefix`
pub fn flatten(prefix: &str, fields: &Document) -> Document {
    let mut out = Document::new();
    flatten_into(&mut out, prefix, &FieldValue::from(fields.clone()));
    out
}

/// Rebuild a nested map from dotted leaves
///
/// When a path is both a leaf and a parent (`a = 1`, `a.b = 2`), the map
/// wins.
pub fn unflatten(flat: &Document) -> FieldValue {
    let mut root = BTreeMap::new();
    for (path, value) in flat {
        insert_leaf(&mut root, path, value.clone());
    }
    FieldValue::Map(root)
}

fn insert_leaf(map: &mut BTreeMap<String, FieldValue>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            if !matches!(map.get(path), Some(FieldValue::Map(_))) {
                map.insert(path.to_string(), FieldValue::from(value));
            }
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| FieldValue::Map(BTreeMap::new()));
            if entry.is_scalar() {
                *entry = FieldValue::Map(BTreeMap::new());
            }
            if let FieldValue::Map(child) = entry {
                insert_leaf(child, rest, value);
            }
        }
    }
}
