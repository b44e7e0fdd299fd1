//! Filtered, sorted retrieval of run and job records
//!
//! Callers use public field names; stored records use the names below.
//! Runs store the workspace under `ws` but expose it as `ws_name`; jobs
//! use the same names on both sides. Translation applies to filter keys
//! (including inside `$and` / `$or`), projection keys, the sort column,
//! and the keys of every returned record.
//!
//! Projections may name whole field groups of the versioned record
//! layout. `run_info` / `job_info` select everything; `run_stats`,
//! `hparams`, `metrics` (runs) and `job_stats`, `connect_info` (jobs) are
//! dropped, since those fields are stored inline.

use runstore_core::{doc, Document, Error, FindOptions, Result, SortOrder, Update, Value};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::store::{validate_ws_name, MetadataStore, JOBS_CONTAINER};

/// Stored name of the run's workspace field
pub const STORED_WS_FIELD: &str = "ws";

/// (public, stored) field names that differ for run records
const RUN_FIELD_NAMES: &[(&str, &str)] = &[("ws_name", STORED_WS_FIELD)];

/// Projection groups selecting every run field
const RUN_ALL_GROUPS: &[&str] = &["run_info"];
/// Projection groups dropped for runs
const RUN_INLINE_GROUPS: &[&str] = &["run_stats", "hparams", "metrics"];
/// Projection groups selecting every job field
const JOB_ALL_GROUPS: &[&str] = &["job_info"];
/// Projection groups dropped for jobs
const JOB_INLINE_GROUPS: &[&str] = &["job_stats", "connect_info"];

/// Direction of a field-name translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToStored,
    ToPublic,
}

fn translate_name<'n>(name: &'n str, names: &[(&'n str, &'n str)], dir: Direction) -> &'n str {
    for (public, stored) in names {
        let (from, to) = match dir {
            Direction::ToStored => (public, stored),
            Direction::ToPublic => (stored, public),
        };
        if name == *from {
            return *to;
        }
    }
    name
}

fn translate_keys(doc: &Document, names: &[(&str, &str)], dir: Direction) -> Document {
    let mut out = Document::new();
    for (key, value) in doc {
        let value = match (key.as_str(), value) {
            ("$and" | "$or", Value::Array(clauses)) => Value::Array(
                clauses
                    .iter()
                    .map(|clause| match clause {
                        Value::Object(inner) => Value::Object(translate_keys(inner, names, dir)),
                        other => other.clone(),
                    })
                    .collect(),
            ),
            _ => value.clone(),
        };
        out.insert(translate_name(key, names, dir).to_string(), value);
    }
    out
}

/// Rewrite a public run filter into stored field names
pub fn stored_run_filter(filter: &Document) -> Document {
    translate_keys(filter, RUN_FIELD_NAMES, Direction::ToStored)
}

/// Rewrite a stored run record into public field names
pub fn public_run_record(record: &Document) -> Document {
    translate_keys(record, RUN_FIELD_NAMES, Direction::ToPublic)
}

fn normalize_projection(
    fields: Option<&Document>,
    select_all: &[&str],
    inline: &[&str],
) -> Option<Document> {
    let fields = fields?;
    if select_all.iter().any(|g| fields.contains_key(*g)) {
        return None;
    }
    let out: Document = fields
        .iter()
        .filter(|(k, _)| !inline.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Normalize and translate a public run projection
pub fn stored_run_projection(fields: Option<&Document>) -> Option<Document> {
    normalize_projection(fields, RUN_ALL_GROUPS, RUN_INLINE_GROUPS)
        .map(|p| translate_keys(&p, RUN_FIELD_NAMES, Direction::ToStored))
}

/// Normalize a public job projection
pub fn stored_job_projection(fields: Option<&Document>) -> Option<Document> {
    normalize_projection(fields, JOB_ALL_GROUPS, JOB_INLINE_GROUPS)
}

/// Build a `$set`/`$unset` update for `tags.<name>` fields
pub(crate) fn tag_update(tags: &Document, clear: bool) -> Result<Update> {
    if tags.is_empty() {
        return Err(Error::InvalidInput("no tags given".to_string()));
    }
    let mut update = Update::new();
    for (name, value) in tags {
        if name.is_empty() || name.starts_with('$') {
            return Err(Error::InvalidInput(format!("invalid tag name '{}'", name)));
        }
        let path = format!("tags.{}", name);
        update = if clear {
            update.unset(path)
        } else {
            update.set(path, value.clone())
        };
    }
    Ok(update)
}

/// A filtered, sorted, paginated request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    /// Filter in public field names
    pub filter: Document,
    /// Projection in public field names
    pub fields: Option<Document>,
    /// Sort column and direction
    pub sort: Option<(String, SortOrder)>,
    /// Matches to skip
    pub skip: Option<usize>,
    /// Maximum records to return
    pub first: Option<usize>,
    /// Count matches first and warn about large results
    pub count: bool,
    /// Cursor batch size; the store's `batch_size` when unset
    pub batch_size: Option<usize>,
}

impl RecordQuery {
    /// Query every record matching `filter`
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    /// Restrict the returned fields
    pub fn fields(mut self, fields: Document) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Sort by `column`; a negative `direction` sorts descending
    pub fn sort(mut self, column: impl Into<String>, direction: i32) -> Self {
        self.sort = Some((column.into(), SortOrder::from_direction(direction)));
        self
    }

    /// Skip the first `n` matches
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    /// Return at most `n` records
    pub fn first(mut self, n: usize) -> Self {
        self.first = Some(n);
        self
    }

    /// Count matches before fetching
    pub fn count(mut self, count: bool) -> Self {
        self.count = count;
        self
    }

    /// Fetch `n` records per round trip
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n);
        self
    }

    /// Records a find returns when `matched` records pass the filter
    pub fn result_count(&self, matched: u64) -> u64 {
        let count = matched.saturating_sub(self.skip.unwrap_or(0) as u64);
        match self.first {
            Some(first) => count.min(first as u64),
            None => count,
        }
    }
}

/// Record retrieval
pub struct QueryLayer<'a> {
    store: &'a MetadataStore,
}

impl<'a> QueryLayer<'a> {
    pub(crate) fn new(store: &'a MetadataStore) -> Self {
        Self { store }
    }

    /// Run records of a workspace matching `filter`
    pub fn get_info_for_runs(
        &self,
        ws_name: &str,
        filter: &Document,
        fields: Option<&Document>,
    ) -> Result<Vec<Document>> {
        validate_ws_name(ws_name)?;
        let filter = stored_run_filter(filter);
        let mut options = FindOptions::new();
        if let Some(projection) = stored_run_projection(fields) {
            options = options.projection(projection);
        }

        let store = self.store;
        let records = store.retry.records("get_info_for_runs", || {
            store.backend.find(ws_name, &filter, &options)
        })?;
        debug!(target: "runstore::query", ws = ws_name, records = records.len(), "Fetched runs");
        Ok(records.iter().map(public_run_record).collect())
    }

    /// Run records of a workspace, sorted and paginated
    pub fn get_filtered_sorted_run_info(
        &self,
        ws_name: &str,
        query: &RecordQuery,
    ) -> Result<Vec<Document>> {
        validate_ws_name(ws_name)?;
        let filter = stored_run_filter(&query.filter);
        let projection = stored_run_projection(query.fields.as_ref());
        let sort = query.sort.as_ref().map(|(column, order)| {
            (
                translate_name(column, RUN_FIELD_NAMES, Direction::ToStored).to_string(),
                *order,
            )
        });

        let records = self.filtered_sorted(ws_name, filter, projection, sort, query)?;
        Ok(records.iter().map(public_run_record).collect())
    }

    /// Job records matching `filter`
    pub fn get_info_for_jobs(
        &self,
        filter: &Document,
        fields: Option<&Document>,
    ) -> Result<Vec<Document>> {
        let mut options = FindOptions::new();
        if let Some(projection) = stored_job_projection(fields) {
            options = options.projection(projection);
        }

        let store = self.store;
        let records = store.retry.records("get_info_for_jobs", || {
            store.backend.find(JOBS_CONTAINER, filter, &options)
        })?;
        debug!(target: "runstore::query", records = records.len(), "Fetched jobs");
        Ok(records)
    }

    /// Job records, sorted and paginated
    pub fn get_filtered_sorted_job_info(&self, query: &RecordQuery) -> Result<Vec<Document>> {
        let projection = stored_job_projection(query.fields.as_ref());
        self.filtered_sorted(
            JOBS_CONTAINER,
            query.filter.clone(),
            projection,
            query.sort.clone(),
            query,
        )
    }

    /// Every run of a workspace, without `log_records` unless asked
    pub fn get_ws_runs(
        &self,
        ws_name: &str,
        filter: Option<&Document>,
        include_log_records: bool,
    ) -> Result<Vec<Document>> {
        let fields = if include_log_records {
            None
        } else {
            Some(doc(json!({"log_records": 0})))
        };
        let filter = filter.cloned().unwrap_or_default();
        self.get_info_for_runs(ws_name, &filter, fields.as_ref())
    }

    fn filtered_sorted(
        &self,
        container: &str,
        filter: Document,
        projection: Option<Document>,
        sort: Option<(String, SortOrder)>,
        query: &RecordQuery,
    ) -> Result<Vec<Document>> {
        let store = self.store;

        if query.count {
            let matched = store.retry.call("count_records", || {
                store.backend.count(container, &filter)
            })?;
            let count = query.result_count(matched);
            info!(target: "runstore::query", container, count, "Retrieving records");
            if count > store.config.large_result_warning {
                warn!(
                    target: "runstore::query",
                    container,
                    count,
                    "Large result; use first/skip to page through it"
                );
            }
        }

        let mut options = FindOptions::new()
            .batch_size(query.batch_size.unwrap_or(store.config.batch_size).max(1));
        if let Some(projection) = projection {
            options = options.projection(projection);
        }
        if let Some((column, order)) = sort {
            options = options.sort(column, order);
        }
        if let Some(skip) = query.skip {
            options = options.skip(skip);
        }
        if let Some(first) = query.first {
            options = options.limit(first);
        }

        let records = store.retry.records("get_db_records", || {
            store.backend.find(container, &filter, &options)
        })?;
        debug!(target: "runstore::query", container, records = records.len(), "Fetched records");
        Ok(records)
    }
}
