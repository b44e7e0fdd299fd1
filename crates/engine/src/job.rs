//! Job record lifecycle
//!
//! Job records live in the `__jobs__` container and carry reference counts
//! of running nodes and runs. Every transition is a single atomic update on
//! the job record; nothing is read and then written back.
//!
//! Decrements are guarded: the filter requires the counter to be positive,
//! so an exit without a matching start changes nothing and reports
//! [`Error::UnmatchedTransition`] instead of driving a counter negative.

use std::collections::BTreeSet;

use runstore_core::document::get_str;
use runstore_core::{
    doc, id_filter, Document, Error, JobStatus, Result, ReturnDocument, Update, Value, ID_FIELD,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::query::tag_update;
use crate::store::{validate_ws_name, MetadataStore, JOBS_CONTAINER};

/// Counters initialized on every new job record
const JOB_COUNTERS: &[&str] = &["running_nodes", "running_runs", "completed_runs", "error_runs"];

/// Job record operations
pub struct JobManager<'a> {
    store: &'a MetadataStore,
}

impl<'a> JobManager<'a> {
    pub(crate) fn new(store: &'a MetadataStore) -> Self {
        Self { store }
    }

    fn enabled(&self) -> bool {
        self.store.config.update_job_stats
    }

    /// Insert a new job record
    ///
    /// The record starts in `created` with all counters at 0 unless `fields`
    /// says otherwise. Inserting an existing job id is logged and ignored.
    /// Returns whether a record was inserted.
    pub fn create_job(&self, job_id: &str, ws_name: &str, fields: Document) -> Result<bool> {
        validate_ws_name(ws_name)?;
        if job_id.is_empty() {
            return Err(Error::InvalidInput("job id is empty".to_string()));
        }
        if !self.enabled() {
            return Ok(false);
        }

        let mut record = fields;
        record.insert(ID_FIELD.to_string(), Value::from(job_id));
        record.insert("job_id".into(), Value::from(job_id));
        record.insert("ws_name".into(), Value::from(ws_name));
        record
            .entry("job_status")
            .or_insert_with(|| Value::from(JobStatus::Created.as_str()));
        for counter in JOB_COUNTERS {
            record.entry(*counter).or_insert_with(|| json!(0));
        }

        let store = self.store;
        let inserted = store
            .retry
            .call_ignoring("create_job", || {
                store.backend.insert_one(JOBS_CONTAINER, record.clone())
            })
            .is_some();
        debug!(target: "runstore::job", job = job_id, ws = ws_name, inserted, "Created job");
        Ok(inserted)
    }

    /// `$set` fields on a job record, creating it if needed
    pub fn update_job_info(&self, job_id: &str, fields: Document) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        let store = self.store;
        let update = Update::new().set_all(fields);
        store.retry.call("update_job_info", || {
            store
                .backend
                .update_one(JOBS_CONTAINER, &id_filter(job_id), &update, true)
        })?;
        Ok(())
    }

    /// A compute node of the job started
    ///
    /// Increments `running_nodes` and sets `job_status` to `running` in one
    /// update.
    pub fn node_start(&self, job_id: &str) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        let update = Update::new()
            .inc("running_nodes", 1)
            .set("job_status", JobStatus::Running.as_str());
        self.transition("job_node_start", job_id, id_filter(job_id), &update)?;
        debug!(target: "runstore::job", job = job_id, "Node started");
        Ok(())
    }

    /// A compute node of the job exited
    ///
    /// Decrements `running_nodes`, then marks the job `completed` if no
    /// node is left running. The completion write matches only while the
    /// job is not yet completed, so of several nodes exiting together
    /// exactly one completes the job. Returns whether this call did.
    pub fn node_exit(&self, job_id: &str) -> Result<bool> {
        if !self.enabled() {
            return Ok(false);
        }
        let update = Update::new().inc("running_nodes", -1);
        self.transition(
            "job_node_exit",
            job_id,
            guarded_filter(job_id, "running_nodes"),
            &update,
        )?;

        let store = self.store;
        let filter = doc(json!({
            "_id": job_id,
            "running_nodes": 0,
            "job_status": {"$ne": JobStatus::Completed.as_str()},
        }));
        let complete = Update::new().set("job_status", JobStatus::Completed.as_str());
        let before = store.retry.call("job_node_exit", || {
            store.backend.find_one_and_update(
                JOBS_CONTAINER,
                &filter,
                &complete,
                false,
                ReturnDocument::Before,
            )
        })?;

        let completed = before.is_some();
        if completed {
            info!(target: "runstore::job", job = job_id, "Job completed");
        }
        Ok(completed)
    }

    /// A run of the job started
    pub fn run_start(&self, job_id: &str) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        let update = Update::new().inc("running_runs", 1);
        self.transition("job_run_start", job_id, id_filter(job_id), &update)
    }

    /// A run of the job exited
    ///
    /// Decrements `running_runs`, increments `completed_runs` and, for a
    /// nonzero exit code, `error_runs`, all in one update.
    pub fn run_exit(&self, job_id: &str, exit_code: i32) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        let update = Update::new()
            .inc("running_runs", -1)
            .inc("completed_runs", 1)
            .inc("error_runs", i64::from(exit_code != 0));
        self.transition(
            "job_run_exit",
            job_id,
            guarded_filter(job_id, "running_runs"),
            &update,
        )
    }

    /// Record how to reach one of the job's nodes
    pub fn update_connect_info_by_node(
        &self,
        job_id: &str,
        node_id: &str,
        connect_info: Value,
    ) -> Result<()> {
        if node_id.is_empty() || node_id.contains('.') || node_id.starts_with('$') {
            return Err(Error::InvalidInput(format!("invalid node id '{}'", node_id)));
        }
        let update = Update::new().set(format!("connect_info_by_node.{}", node_id), connect_info);
        self.transition("update_connect_info_by_node", job_id, id_filter(job_id), &update)
    }

    /// Overwrite the job status
    pub fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        let update = Update::new().set("job_status", status.as_str());
        self.transition("set_job_status", job_id, id_filter(job_id), &update)
    }

    /// Set or clear tags on every job matching `filter`
    ///
    /// Returns the number of records changed, or `None` when job stats are
    /// disabled.
    pub fn set_job_tags(&self, filter: &Document, tags: &Document, clear: bool) -> Result<Option<u64>> {
        if !self.enabled() {
            return Ok(None);
        }
        let update = tag_update(tags, clear)?;
        let store = self.store;
        let result = store.retry.call("set_job_tags", || {
            store
                .backend
                .update_many(JOBS_CONTAINER, filter, &update, false)
        })?;
        Ok(Some(result.modified))
    }

    /// Workspace a job belongs to
    pub fn get_job_workspace(&self, job_id: &str) -> Result<Option<String>> {
        let records = self
            .store
            .query()
            .get_info_for_jobs(&id_filter(job_id), Some(&doc(json!({"ws_name": 1}))))?;
        Ok(records
            .first()
            .and_then(|r| get_str(r, "ws_name"))
            .map(str::to_string))
    }

    /// Ids of every job matching `filter` (all jobs when `None`)
    pub fn job_names(&self, filter: Option<&Document>) -> Result<Vec<String>> {
        let filter = filter.cloned().unwrap_or_default();
        let records = self
            .store
            .query()
            .get_info_for_jobs(&filter, Some(&doc(json!({"_id": 1}))))?;
        Ok(records
            .iter()
            .filter_map(|r| r.get(ID_FIELD).and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Distinct experiment names used by jobs of a workspace, sorted
    pub fn experiments_in_workspace(&self, ws_name: &str) -> Result<Vec<String>> {
        let records = self.store.query().get_info_for_jobs(
            &doc(json!({"ws_name": ws_name})),
            Some(&doc(json!({"exper_name": 1}))),
        )?;
        let names: BTreeSet<String> = records
            .iter()
            .filter_map(|r| get_str(r, "exper_name"))
            .map(str::to_string)
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Apply one atomic update to a job, reporting why nothing matched
    fn transition(
        &self,
        operation: &str,
        job_id: &str,
        filter: Document,
        update: &Update,
    ) -> Result<()> {
        let store = self.store;
        let result = store.retry.call(operation, || {
            store
                .backend
                .update_one(JOBS_CONTAINER, &filter, update, false)
        })?;
        if result.matched > 0 {
            return Ok(());
        }

        let exists = store.retry.call(operation, || {
            store.backend.count(JOBS_CONTAINER, &id_filter(job_id))
        })? > 0;
        if exists {
            warn!(target: "runstore::job", job = job_id, operation, "Exit without matching start");
            Err(Error::UnmatchedTransition(format!(
                "{} on job '{}' has no matching start",
                operation, job_id
            )))
        } else {
            Err(Error::NotFound(format!("job '{}'", job_id)))
        }
    }
}

/// `{_id: job_id, <counter>: {$gt: 0}}`
fn guarded_filter(job_id: &str, counter: &str) -> Document {
    let mut filter = id_filter(job_id);
    filter.insert(counter.to_string(), json!({"$gt": 0}));
    filter
}
