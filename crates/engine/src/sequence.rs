//! Sequence allocation
//!
//! Ids come from counter records in the `ws_counters` container:
//! - one record per workspace (`_id = <ws>`) with `next_run`, `next_end`
//!   and `next_child.<run>`
//! - one global record (`_id = "__jobs__"`) with `next_job`
//!
//! Every allocation is a single server-side `$inc` returning the
//! pre-increment value, so concurrent callers never see the same id.

use std::collections::BTreeMap;

use runstore_core::document::get_u64;
use runstore_core::{
    doc, id_filter, Document, Error, FindOptions, Result, ReturnDocument, Update, Value, ID_FIELD,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::store::{
    validate_ws_name, MetadataStore, COUNTERS_CONTAINER, JOB_COUNTER_ID, LEGACY_END_ID_SUFFIX,
};

/// Decoded workspace counter record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRecord {
    /// Workspace the counters belong to
    pub ws_name: String,
    /// Next run number to hand out
    pub next_run: u64,
    /// Next `end_id` to hand out
    pub next_end: u64,
    /// Next child number per parent run
    pub next_child: BTreeMap<String, u64>,
}

impl CounterRecord {
    fn from_document(ws_name: &str, record: &Document) -> Self {
        let next_child = record
            .get("next_child")
            .and_then(Value::as_object)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|(run, n)| n.as_u64().map(|n| (run.clone(), n)))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            ws_name: ws_name.to_string(),
            next_run: get_u64(record, "next_run").unwrap_or(0),
            next_end: get_u64(record, "next_end").unwrap_or(0),
            next_child,
        }
    }
}

/// Build `run<N>`
pub fn run_name(run_number: u64) -> String {
    format!("run{}", run_number)
}

/// Build the name of a child run: `run<parent>.<1 + run_index - first_run_index>`
///
/// # Errors
///
/// Returns an error if `parent_run_name` is not of the form `run<N>` (or
/// `run<N>.<M>`) or if `run_index` precedes `first_run_index`.
pub fn child_run_name(
    parent_run_name: &str,
    run_index: u64,
    first_run_index: u64,
) -> Result<String> {
    let parent_num = parent_run_name
        .strip_prefix("run")
        .and_then(|rest| rest.split('.').next())
        .filter(|num| !num.is_empty() && num.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| {
            Error::InvalidInput(format!("'{}' is not a run name", parent_run_name))
        })?;
    if run_index < first_run_index {
        return Err(Error::InvalidInput(format!(
            "run index {} precedes first run index {}",
            run_index, first_run_index
        )));
    }
    Ok(format!(
        "run{}.{}",
        parent_num,
        1 + run_index - first_run_index
    ))
}

/// Id allocation against the counter records
pub struct Sequences<'a> {
    store: &'a MetadataStore,
}

impl<'a> Sequences<'a> {
    pub(crate) fn new(store: &'a MetadataStore) -> Self {
        Self { store }
    }

    /// Allocate the next global job number
    ///
    /// The counter record is created lazily, starting at `default_next`.
    pub fn next_job_id(&self, default_next: u64) -> Result<u64> {
        let store = self.store;
        let filter = id_filter(JOB_COUNTER_ID);

        if self.find_counter(&filter)?.is_none() {
            let seed = doc(json!({"_id": JOB_COUNTER_ID, "next_job": default_next}));
            self.insert_tolerating_duplicate("next_job_id", seed)?;
        }

        let before = store.retry.call("next_job_id", || {
            store.backend.find_one_and_update(
                COUNTERS_CONTAINER,
                &filter,
                &Update::new().inc("next_job", 1),
                false,
                ReturnDocument::Before,
            )
        })?;
        let record = before.ok_or_else(|| Error::NotFound("job counter record".to_string()))?;
        let id = get_u64(&record, "next_job").unwrap_or(0);
        debug!(target: "runstore::seq", job_number = id, "Allocated job id");
        Ok(id)
    }

    /// Allocate the next run number in a workspace
    pub fn next_run_id(&self, ws_name: &str, default_next: u64) -> Result<u64> {
        self.next_ws_id(ws_name, "next_run", default_next)
    }

    /// Allocate the next child number under `run_name`
    ///
    /// Child counters start at 0; the first id handed out is 1.
    pub fn next_child_id(&self, ws_name: &str, run_name: &str, default_next: u64) -> Result<u64> {
        if run_name.is_empty() || run_name.contains('.') || run_name.starts_with('$') {
            return Err(Error::InvalidInput(format!(
                "'{}' cannot be used as a child counter key",
                run_name
            )));
        }
        self.next_ws_id(ws_name, &format!("next_child.{}", run_name), default_next)
    }

    /// Allocate the next completion-order id in a workspace
    pub fn next_end_id(&self, ws_name: &str) -> Result<u64> {
        self.next_ws_id(ws_name, "next_end", 1)
    }

    /// Allocate a run number and format it as `run<N>`
    pub fn next_run_name(&self, ws_name: &str) -> Result<String> {
        Ok(run_name(self.next_run_id(ws_name, 1)?))
    }

    /// Read the workspace counter record, creating it if missing
    ///
    /// A workspace without a counter record may still carry the old
    /// `<ws>-end_id` record; its `last_id` seeds `next_end` so completion
    /// ids keep increasing across the layout change. Concurrent creators
    /// race on the insert and the losers' duplicate-key errors are dropped.
    pub fn resolve_counter_record(
        &self,
        ws_name: &str,
        default_next_run: u64,
    ) -> Result<CounterRecord> {
        validate_ws_name(ws_name)?;
        let filter = id_filter(ws_name);

        if let Some(record) = self.find_counter(&filter)? {
            return Ok(CounterRecord::from_document(ws_name, &record));
        }

        let last_id = self.legacy_end_id(ws_name)?;
        let next_end = last_id.map(|id| id + 1).unwrap_or(1);
        debug!(
            target: "runstore::seq",
            ws = ws_name,
            default_next_run,
            next_end,
            legacy = last_id.is_some(),
            "Creating counter record"
        );

        let seed = doc(json!({
            "_id": ws_name,
            "next_run": default_next_run,
            "next_end": next_end,
            "next_child": {},
        }));
        self.insert_tolerating_duplicate("resolve_counter_record", seed)?;

        let record = self
            .find_counter(&filter)?
            .ok_or_else(|| Error::NotFound(format!("counter record for '{}'", ws_name)))?;
        Ok(CounterRecord::from_document(ws_name, &record))
    }

    /// `last_id` from the legacy `<ws>-end_id` record, if present
    pub fn legacy_end_id(&self, ws_name: &str) -> Result<Option<u64>> {
        let filter = id_filter(format!("{}{}", ws_name, LEGACY_END_ID_SUFFIX));
        Ok(self
            .find_counter(&filter)?
            .and_then(|record| get_u64(&record, "last_id")))
    }

    /// Reset a workspace's counters, dropping every child counter
    pub fn set_workspace_counters(&self, ws_name: &str, next_run: u64, next_end: u64) -> Result<()> {
        validate_ws_name(ws_name)?;
        let store = self.store;
        let update = Update::new()
            .set("next_run", next_run)
            .set("next_end", next_end)
            .set("next_child", json!({}));
        store.retry.call("set_workspace_counters", || {
            store
                .backend
                .update_one(COUNTERS_CONTAINER, &id_filter(ws_name), &update, true)
        })?;
        Ok(())
    }

    /// Names of every workspace with a counter record
    pub fn workspace_names(&self) -> Result<Vec<String>> {
        let store = self.store;
        let options = FindOptions::new().projection(doc(json!({"_id": 1})));
        let records = store.retry.records("get_workspace_names", || {
            store
                .backend
                .find(COUNTERS_CONTAINER, &Document::new(), &options)
        })?;
        Ok(records
            .iter()
            .filter_map(|r| r.get(ID_FIELD).and_then(Value::as_str))
            .filter(|id| *id != JOB_COUNTER_ID && !id.ends_with(LEGACY_END_ID_SUFFIX))
            .map(str::to_string)
            .collect())
    }

    fn next_ws_id(&self, ws_name: &str, path: &str, default_next_run: u64) -> Result<u64> {
        let store = self.store;
        if path.contains('/') {
            return Err(Error::InvalidInput(format!("invalid counter path '{}'", path)));
        }
        self.resolve_counter_record(ws_name, default_next_run)?;

        let filter = id_filter(ws_name);
        let increment = || -> Result<u64> {
            let before = store.retry.call("next_ws_id", || {
                store.backend.find_one_and_update(
                    COUNTERS_CONTAINER,
                    &filter,
                    &Update::new().inc(path, 1),
                    false,
                    ReturnDocument::Before,
                )
            })?;
            let record = before
                .ok_or_else(|| Error::NotFound(format!("counter record for '{}'", ws_name)))?;
            Ok(get_u64(&record, path).unwrap_or(0))
        };

        let mut id = increment()?;
        if id == 0 {
            // Child counters start at 0; hand out 1 instead.
            id = increment()?;
        }
        debug!(target: "runstore::seq", ws = ws_name, path, id, "Allocated id");
        Ok(id)
    }

    fn find_counter(&self, filter: &Document) -> Result<Option<Document>> {
        let store = self.store;
        let options = FindOptions::new().limit(1);
        let mut records = store.retry.records("find_counter", || {
            store.backend.find(COUNTERS_CONTAINER, filter, &options)
        })?;
        Ok(records.pop())
    }

    fn insert_tolerating_duplicate(&self, operation: &str, seed: Document) -> Result<()> {
        let store = self.store;
        match store.retry.call(operation, || {
            store.backend.insert_one(COUNTERS_CONTAINER, seed.clone())
        }) {
            Ok(()) => Ok(()),
            Err(e) if e.is_ignorable() => {
                warn!(target: "runstore::seq", operation, error = %e, "Counter record already created");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
