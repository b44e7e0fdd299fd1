//! Request types for document backend calls
//!
//! - [`Update`]: field-level update operators (`$set`, `$unset`, `$inc`, `$push`)
//! - [`FindOptions`]: projection, sort, skip, limit and cursor batch size
//! - [`ReturnDocument`]: which image a find-and-modify hands back
//! - [`UpdateResult`] / [`DeleteResult`]: write outcomes

use serde_json::{Map, Value};

use crate::document::Document;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    /// Smallest first
    #[default]
    Ascending,
    /// Largest first
    Descending,
}

impl SortOrder {
    /// Parse the numeric convention (`1` ascending, `-1` descending)
    pub fn from_direction(dir: i32) -> Self {
        if dir < 0 {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        }
    }
}

/// A set of field-level update operators applied atomically to one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    /// `$set`: path -> new value
    pub set: Document,
    /// `$unset`: paths to remove
    pub unset: Vec<String>,
    /// `$inc`: path -> delta (missing fields count as 0)
    pub inc: Vec<(String, i64)>,
    /// `$push`: path -> value appended to an array
    pub push: Vec<(String, Value)>,
}

impl Update {
    /// Create an empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// `$set` a single path
    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(path.into(), value.into());
        self
    }

    /// `$set` every entry of `fields`
    pub fn set_all(mut self, fields: Document) -> Self {
        self.set.extend(fields);
        self
    }

    /// `$unset` a path
    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.push(path.into());
        self
    }

    /// `$inc` a path by `delta`
    pub fn inc(mut self, path: impl Into<String>, delta: i64) -> Self {
        self.inc.push((path.into(), delta));
        self
    }

    /// `$push` a value onto the array at `path`
    pub fn push(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push.push((path.into(), value.into()));
        self
    }

    /// Check if the update has no operators
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty() && self.inc.is_empty() && self.push.is_empty()
    }

    /// Render as a wire-style update document
    pub fn to_document(&self) -> Document {
        let mut out = Document::new();
        if !self.set.is_empty() {
            out.insert("$set".into(), Value::Object(self.set.clone()));
        }
        if !self.unset.is_empty() {
            let unset: Map<String, Value> = self
                .unset
                .iter()
                .map(|p| (p.clone(), Value::from("")))
                .collect();
            out.insert("$unset".into(), Value::Object(unset));
        }
        if !self.inc.is_empty() {
            let inc: Map<String, Value> = self
                .inc
                .iter()
                .map(|(p, d)| (p.clone(), Value::from(*d)))
                .collect();
            out.insert("$inc".into(), Value::Object(inc));
        }
        if !self.push.is_empty() {
            let push: Map<String, Value> = self.push.iter().cloned().collect();
            out.insert("$push".into(), Value::Object(push));
        }
        out
    }
}

/// Options for a find call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Inclusion (`{field: 1}`) or exclusion (`{field: 0}`) projection
    pub projection: Option<Document>,
    /// Sort keys, applied in order
    pub sort: Vec<(String, SortOrder)>,
    /// Number of matching documents to skip
    pub skip: Option<usize>,
    /// Maximum number of documents to return
    pub limit: Option<usize>,
    /// Documents fetched per cursor round trip
    pub batch_size: Option<usize>,
}

impl FindOptions {
    /// Create default options (everything, natural order)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the projection
    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Add a sort key
    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    /// Skip the first `n` matches
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    /// Return at most `n` documents
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Set the cursor batch size
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n);
        self
    }
}

/// Which document image a find-and-modify returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnDocument {
    /// The document as it was before the update
    #[default]
    Before,
    /// The document after the update
    After,
}

/// Outcome of an update call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    /// Documents that matched the filter
    pub matched: u64,
    /// Documents whose content changed
    pub modified: u64,
    /// `_id` of the document created by an upsert
    pub upserted_id: Option<Value>,
}

/// Outcome of a delete call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    /// Documents removed
    pub deleted: u64,
}
