//! Schemaless documents and dotted field paths
//!
//! A [`Document`] is a JSON object. Nested fields are addressed with dotted
//! paths (`"metrics.loss"`, `"next_child.run12"`), the same way the backend
//! addresses them in filters and updates.

use serde_json::{Map, Value};

/// A schemaless record stored in a container
pub type Document = Map<String, Value>;

/// Name of the primary key field of every document
pub const ID_FIELD: &str = "_id";

/// Error raised when a path walks through a non-object value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot traverse non-object value at '{prefix}' while resolving '{path}'")]
pub struct PathConflict {
    /// Full path being resolved
    pub path: String,
    /// Prefix at which a scalar or array was found
    pub prefix: String,
}

/// Look up the value at a dotted path
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set the value at a dotted path, creating intermediate objects
pub fn set_path(doc: &mut Document, path: &str, value: Value) -> Result<(), PathConflict> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut current = doc;
    if let Some(parents) = parents {
        let mut walked = 0;
        for segment in parents.split('.') {
            walked += segment.len() + usize::from(walked > 0);
            let slot = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match slot {
                Value::Object(map) => map,
                _ => {
                    return Err(PathConflict {
                        path: path.to_string(),
                        prefix: path[..walked].to_string(),
                    })
                }
            };
        }
    }
    current.insert(leaf.to_string(), value);
    Ok(())
}

/// Remove the value at a dotted path, returning it if present
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        None => doc.remove(path),
        Some((parents, leaf)) => {
            let mut current = doc;
            for segment in parents.split('.') {
                current = current.get_mut(segment)?.as_object_mut()?;
            }
            current.remove(leaf)
        }
    }
}

/// Read a non-negative integer field, tolerating float encodings
pub fn get_u64(doc: &Document, path: &str) -> Option<u64> {
    let value = get_path(doc, path)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Read a string field
pub fn get_str<'a>(doc: &'a Document, path: &str) -> Option<&'a str> {
    get_path(doc, path).and_then(Value::as_str)
}

/// Build a `{"_id": id}` filter
pub fn id_filter(id: impl Into<Value>) -> Document {
    let mut filter = Document::new();
    filter.insert(ID_FIELD.to_string(), id.into());
    filter
}

/// Convert a `json!` object literal into a [`Document`]
///
/// Non-object values yield an empty document.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}
