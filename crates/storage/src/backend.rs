//! Document backend abstraction
//!
//! This trait is the adapter boundary between the store and a remote
//! document database. Every store operation maps to one of these calls.
//!
//! Adapters are responsible for classifying failures into
//! [`ErrorClass`](runstore_core::ErrorClass) before returning them; nothing
//! above this layer inspects backend-specific error types.
//!
//! Thread safety: all methods must be safe to call concurrently from
//! multiple threads (requires Send + Sync). Each single-document call must
//! be atomic with respect to every other call on the same document.

use runstore_core::{
    BackendResult, DeleteResult, Document, FindOptions, ReturnDocument, Update, UpdateResult,
};

/// Stream of documents returned by a find
///
/// Iteration may perform further round trips and can fail part-way.
pub type Cursor = Box<dyn Iterator<Item = BackendResult<Document>> + Send>;

/// Remote schemaless document database
pub trait DocumentBackend: Send + Sync {
    /// Find documents matching `filter`
    fn find(&self, collection: &str, filter: &Document, options: &FindOptions)
        -> BackendResult<Cursor>;

    /// Count documents matching `filter`
    fn count(&self, collection: &str, filter: &Document) -> BackendResult<u64>;

    /// Insert one document
    ///
    /// Fails with an ignorable duplicate-key error when `_id` already exists.
    /// A document without `_id` is assigned a generated one.
    fn insert_one(&self, collection: &str, document: Document) -> BackendResult<()>;

    /// Apply `update` to the first document matching `filter`
    ///
    /// With `upsert`, a missing document is created from the filter's
    /// equality fields before the update is applied.
    fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        update: &Update,
        upsert: bool,
    ) -> BackendResult<UpdateResult>;

    /// Apply `update` to every document matching `filter`
    fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        update: &Update,
        upsert: bool,
    ) -> BackendResult<UpdateResult>;

    /// Atomically locate the first match, apply `update`, and return one image of it
    ///
    /// Returns `None` when nothing matched and no upsert happened.
    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Update,
        upsert: bool,
        return_document: ReturnDocument,
    ) -> BackendResult<Option<Document>>;

    /// Delete the first document matching `filter`
    fn delete_one(&self, collection: &str, filter: &Document) -> BackendResult<DeleteResult>;

    /// Delete every document matching `filter`
    fn delete_many(&self, collection: &str, filter: &Document) -> BackendResult<DeleteResult>;

    /// Drop a whole container. Returns whether it existed.
    fn drop_collection(&self, collection: &str) -> BackendResult<bool>;

    /// Names of existing containers
    fn list_collections(&self) -> BackendResult<Vec<String>>;
}
