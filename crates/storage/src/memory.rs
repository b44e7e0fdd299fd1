//! MemoryBackend: in-process document backend
//!
//! Implements [`DocumentBackend`] with:
//! - `BTreeMap<String, Collection>` of containers behind a `parking_lot::RwLock`
//! - insertion-ordered documents per container (natural order)
//! - an `_id` index for O(log n) keyed lookups
//!
//! # Atomicity
//!
//! Every call holds the container lock for its whole read-modify-write, so
//! find-and-modify, conditional updates and upserts are indivisible with
//! respect to each other. This is the guarantee the store relies on for
//! counters and job transitions.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use runstore_core::{
    BackendError, BackendResult, DeleteResult, Document, FindOptions, ReturnDocument, Update,
    UpdateResult, Value, ID_FIELD,
};
use tracing::debug;

use crate::backend::{Cursor, DocumentBackend};
use crate::{matcher, projection, update};

/// Documents fetched per round trip when the caller gives no batch size
pub const DEFAULT_BATCH_SIZE: usize = 101;

/// Canonical index key for an `_id` value
fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default, Clone)]
struct Collection {
    /// Insertion sequence -> document
    docs: BTreeMap<u64, Document>,
    /// `_id` key -> insertion sequence
    ids: HashMap<String, u64>,
    next_seq: u64,
}

impl Collection {
    fn insert(&mut self, mut doc: Document) -> BackendResult<Value> {
        let id = doc
            .entry(ID_FIELD.to_string())
            .or_insert_with(|| Value::from(uuid::Uuid::new_v4().to_string()))
            .clone();
        let key = id_key(&id);
        if self.ids.contains_key(&key) {
            return Err(BackendError::duplicate_key(&key));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ids.insert(key, seq);
        self.docs.insert(seq, doc);
        Ok(id)
    }

    /// Sequences of matching documents, in natural order
    fn matching(&self, filter: &Document, first_only: bool) -> BackendResult<Vec<u64>> {
        // Fast path for keyed lookups
        if let Some(id) = filter.get(ID_FIELD).filter(|v| !v.is_object()) {
            return match self.ids.get(&id_key(id)) {
                Some(seq) if matcher::matches(&self.docs[seq], filter)? => Ok(vec![*seq]),
                _ => Ok(Vec::new()),
            };
        }
        let mut out = Vec::new();
        for (seq, doc) in &self.docs {
            if matcher::matches(doc, filter)? {
                out.push(*seq);
                if first_only {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn remove(&mut self, seq: u64) {
        if let Some(doc) = self.docs.remove(&seq) {
            if let Some(id) = doc.get(ID_FIELD) {
                self.ids.remove(&id_key(id));
            }
        }
    }
}

/// Cursor over a materialized result, delivered in batches
struct MemoryCursor {
    docs: std::vec::IntoIter<Document>,
    batch_size: usize,
    remaining_in_batch: usize,
    round_trips: Arc<AtomicU64>,
}

impl Iterator for MemoryCursor {
    type Item = BackendResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        let doc = self.docs.next()?;
        if self.remaining_in_batch == 0 {
            self.round_trips.fetch_add(1, Ordering::Relaxed);
            self.remaining_in_batch = self.batch_size;
        }
        self.remaining_in_batch -= 1;
        Some(Ok(doc))
    }
}

/// In-process document backend
///
/// Thread-safe through `parking_lot::RwLock`; cheap to share via `Arc`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: RwLock<BTreeMap<String, Collection>>,
    /// Cursor batches served (for observing batch-size behaviour)
    round_trips: Arc<AtomicU64>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cursor batches served so far
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    /// Number of documents in a container (0 if it does not exist)
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.docs.len())
            .unwrap_or(0)
    }

    /// Check if a container exists
    pub fn has_collection(&self, collection: &str) -> bool {
        self.collections.read().contains_key(collection)
    }

    fn update_matching(
        &self,
        collection: &str,
        filter: &Document,
        upd: &Update,
        upsert: bool,
        first_only: bool,
    ) -> BackendResult<UpdateResult> {
        update::validate(upd)?;
        let mut collections = self.collections.write();
        if !upsert && !collections.contains_key(collection) {
            return Ok(UpdateResult::default());
        }
        let coll = collections.entry(collection.to_string()).or_default();

        let targets = coll.matching(filter, first_only)?;
        if targets.is_empty() {
            if !upsert {
                return Ok(UpdateResult::default());
            }
            let mut doc = update::seed_from_filter(filter)?;
            update::apply(&mut doc, upd)?;
            let id = coll.insert(doc)?;
            return Ok(UpdateResult {
                matched: 0,
                modified: 0,
                upserted_id: Some(id),
            });
        }

        // Apply to copies first so a failing document leaves the batch unapplied
        let mut staged = Vec::with_capacity(targets.len());
        let mut modified = 0;
        for seq in &targets {
            let mut doc = coll.docs[seq].clone();
            if update::apply(&mut doc, upd)? {
                modified += 1;
            }
            staged.push((*seq, doc));
        }
        for (seq, doc) in staged {
            coll.docs.insert(seq, doc);
        }
        Ok(UpdateResult {
            matched: targets.len() as u64,
            modified,
            upserted_id: None,
        })
    }

    fn delete_matching(
        &self,
        collection: &str,
        filter: &Document,
        first_only: bool,
    ) -> BackendResult<DeleteResult> {
        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(DeleteResult::default());
        };
        let targets = coll.matching(filter, first_only)?;
        for seq in &targets {
            coll.remove(*seq);
        }
        Ok(DeleteResult {
            deleted: targets.len() as u64,
        })
    }
}

impl DocumentBackend for MemoryBackend {
    fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
    ) -> BackendResult<Cursor> {
        if let Some(p) = &options.projection {
            projection::validate(p)?;
        }

        let mut docs: Vec<Document> = {
            let collections = self.collections.read();
            match collections.get(collection) {
                Some(coll) => coll
                    .matching(filter, false)?
                    .iter()
                    .map(|seq| coll.docs[seq].clone())
                    .collect(),
                None => Vec::new(),
            }
        };

        if !options.sort.is_empty() {
            docs.sort_by(|a, b| projection::compare_by(a, b, &options.sort));
        }
        let skip = options.skip.unwrap_or(0);
        let limit = options.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for doc in docs.into_iter().skip(skip).take(limit) {
            out.push(match &options.projection {
                Some(p) => projection::project(&doc, p)?,
                None => doc,
            });
        }

        debug!(target: "runstore::backend", collection, matched = out.len(), "find");

        Ok(Box::new(MemoryCursor {
            docs: out.into_iter(),
            batch_size: options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
            remaining_in_batch: 0,
            round_trips: Arc::clone(&self.round_trips),
        }))
    }

    fn count(&self, collection: &str, filter: &Document) -> BackendResult<u64> {
        let collections = self.collections.read();
        match collections.get(collection) {
            Some(coll) => Ok(coll.matching(filter, false)?.len() as u64),
            None => Ok(0),
        }
    }

    fn insert_one(&self, collection: &str, document: Document) -> BackendResult<()> {
        let mut collections = self.collections.write();
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(document)
            .map(|_| ())
    }

    fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        update: &Update,
        upsert: bool,
    ) -> BackendResult<UpdateResult> {
        self.update_matching(collection, filter, update, upsert, true)
    }

    fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        update: &Update,
        upsert: bool,
    ) -> BackendResult<UpdateResult> {
        self.update_matching(collection, filter, update, upsert, false)
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        upd: &Update,
        upsert: bool,
        return_document: ReturnDocument,
    ) -> BackendResult<Option<Document>> {
        update::validate(upd)?;
        let mut collections = self.collections.write();
        if !upsert && !collections.contains_key(collection) {
            return Ok(None);
        }
        let coll = collections.entry(collection.to_string()).or_default();

        match coll.matching(filter, true)?.first().copied() {
            Some(seq) => {
                let before = coll.docs[&seq].clone();
                let mut after = before.clone();
                update::apply(&mut after, upd)?;
                coll.docs.insert(seq, after.clone());
                Ok(Some(match return_document {
                    ReturnDocument::Before => before,
                    ReturnDocument::After => after,
                }))
            }
            None if upsert => {
                let mut doc = update::seed_from_filter(filter)?;
                update::apply(&mut doc, upd)?;
                coll.insert(doc.clone())?;
                Ok(match return_document {
                    ReturnDocument::Before => None,
                    ReturnDocument::After => Some(doc),
                })
            }
            None => Ok(None),
        }
    }

    fn delete_one(&self, collection: &str, filter: &Document) -> BackendResult<DeleteResult> {
        self.delete_matching(collection, filter, true)
    }

    fn delete_many(&self, collection: &str, filter: &Document) -> BackendResult<DeleteResult> {
        self.delete_matching(collection, filter, false)
    }

    fn drop_collection(&self, collection: &str) -> BackendResult<bool> {
        Ok(self.collections.write().remove(collection).is_some())
    }

    fn list_collections(&self) -> BackendResult<Vec<String>> {
        Ok(self.collections.read().keys().cloned().collect())
    }
}
