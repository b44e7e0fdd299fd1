//! Fault injection for backend callers
//!
//! [`FaultyBackend`] wraps another backend and fails calls according to a
//! queue of planned [`Fault`]s. Used to exercise retry behaviour:
//! - a call rejected before reaching the backend
//! - a call that succeeded on the backend but whose acknowledgement was lost
//! - a cursor that breaks part-way through iteration

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use runstore_core::{
    BackendError, BackendResult, DeleteResult, Document, ErrorClass, FindOptions, ReturnDocument,
    Update, UpdateResult,
};

use crate::backend::{Cursor, DocumentBackend};

/// A planned failure for one upcoming call
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Fail without touching the backend
    Reject(BackendError),
    /// Perform the call, then report a transient error (lost acknowledgement)
    LostAck,
    /// For finds: yield `after` documents, then fail transiently
    BreakCursor {
        /// Documents delivered before the failure
        after: usize,
    },
}

/// Backend wrapper that injects planned failures
pub struct FaultyBackend<B> {
    inner: B,
    plan: Mutex<VecDeque<Fault>>,
    calls: AtomicU64,
}

impl<B: DocumentBackend> FaultyBackend<B> {
    /// Wrap `inner` with an empty fault plan
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            plan: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// Queue a fault for the next unplanned call
    pub fn inject(&self, fault: Fault) {
        self.plan.lock().push_back(fault);
    }

    /// Reject the next `n` calls with errors of `class`
    pub fn fail_next(&self, n: usize, class: ErrorClass) {
        let mut plan = self.plan.lock();
        for i in 0..n {
            plan.push_back(Fault::Reject(BackendError::new(
                class,
                format!("injected failure {}", i + 1),
            )));
        }
    }

    /// Drop any faults not yet consumed
    pub fn clear(&self) {
        self.plan.lock().clear();
    }

    /// Faults still queued
    pub fn pending(&self) -> usize {
        self.plan.lock().len()
    }

    /// Total calls seen, including failed ones
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// The wrapped backend
    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn next_fault(&self) -> Option<Fault> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.plan.lock().pop_front()
    }

    fn guarded<T>(&self, op: impl FnOnce(&B) -> BackendResult<T>) -> BackendResult<T> {
        match self.next_fault() {
            None | Some(Fault::BreakCursor { .. }) => op(&self.inner),
            Some(Fault::Reject(err)) => Err(err),
            Some(Fault::LostAck) => {
                op(&self.inner)?;
                Err(BackendError::transient("connection reset after write"))
            }
        }
    }
}

/// Cursor that fails after a fixed number of documents
struct BreakingCursor {
    inner: Cursor,
    remaining: usize,
    broken: bool,
}

impl Iterator for BreakingCursor {
    type Item = BackendResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            if self.broken {
                return None;
            }
            self.broken = true;
            return Some(Err(BackendError::transient("cursor connection lost")));
        }
        self.remaining -= 1;
        self.inner.next()
    }
}

impl<B: DocumentBackend> DocumentBackend for FaultyBackend<B> {
    fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
    ) -> BackendResult<Cursor> {
        match self.next_fault() {
            None => self.inner.find(collection, filter, options),
            Some(Fault::Reject(err)) => Err(err),
            Some(Fault::LostAck) => {
                self.inner.find(collection, filter, options)?;
                Err(BackendError::transient("connection reset after read"))
            }
            Some(Fault::BreakCursor { after }) => {
                let inner = self.inner.find(collection, filter, options)?;
                Ok(Box::new(BreakingCursor {
                    inner,
                    remaining: after,
                    broken: false,
                }))
            }
        }
    }

    fn count(&self, collection: &str, filter: &Document) -> BackendResult<u64> {
        self.guarded(|b| b.count(collection, filter))
    }

    fn insert_one(&self, collection: &str, document: Document) -> BackendResult<()> {
        self.guarded(|b| b.insert_one(collection, document))
    }

    fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        update: &Update,
        upsert: bool,
    ) -> BackendResult<UpdateResult> {
        self.guarded(|b| b.update_one(collection, filter, update, upsert))
    }

    fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        update: &Update,
        upsert: bool,
    ) -> BackendResult<UpdateResult> {
        self.guarded(|b| b.update_many(collection, filter, update, upsert))
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Update,
        upsert: bool,
        return_document: ReturnDocument,
    ) -> BackendResult<Option<Document>> {
        self.guarded(|b| b.find_one_and_update(collection, filter, update, upsert, return_document))
    }

    fn delete_one(&self, collection: &str, filter: &Document) -> BackendResult<DeleteResult> {
        self.guarded(|b| b.delete_one(collection, filter))
    }

    fn delete_many(&self, collection: &str, filter: &Document) -> BackendResult<DeleteResult> {
        self.guarded(|b| b.delete_many(collection, filter))
    }

    fn drop_collection(&self, collection: &str) -> BackendResult<bool> {
        self.guarded(|b| b.drop_collection(collection))
    }

    fn list_collections(&self) -> BackendResult<Vec<String>> {
        self.guarded(|b| b.list_collections())
    }
}
