//! Run record lifecycle
//!
//! This module provides the RunManager view for run records. A run record
//! lives in its workspace's container, keyed by run name.
//!
//! Status moves `created`/`allocating` -> `running` -> terminal, with an
//! optional restart cycle back to `running` when a preempted run is
//! rescheduled. Every field update is an upsert stamped with `last_time`.

use runstore_core::document::get_str;
use runstore_core::{
    doc, flatten, id_filter, time, Document, Error, EventKind, FindOptions, Result, RunEvent,
    RunExit, RunSpec, RunStatus, Update, Value, EVENT_ENVELOPE_FIELDS, ID_FIELD,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::query::{stored_run_filter, tag_update, STORED_WS_FIELD};
use crate::store::{validate_ws_name, MetadataStore};

/// Values written when a run starts
#[derive(Debug, Clone, PartialEq)]
pub struct RunStart {
    /// Start time (RFC 3339)
    pub start_time: String,
    /// Seconds between submission and start
    pub queue_duration: f64,
    /// Starts after the first one
    pub restarts: u64,
}

impl RunStart {
    /// Check if this start was a restart
    pub fn is_restart(&self) -> bool {
        self.restarts > 0
    }
}

/// Values written when a run exits
#[derive(Debug, Clone, PartialEq)]
pub struct RunEnd {
    /// Completion-order id within the workspace
    pub end_id: u64,
    /// End time (RFC 3339)
    pub end_time: String,
    /// Seconds between start and exit; absent if the run never started
    pub run_duration: Option<f64>,
}

/// Run record operations
pub struct RunManager<'a> {
    store: &'a MetadataStore,
}

impl<'a> RunManager<'a> {
    pub(crate) fn new(store: &'a MetadataStore) -> Self {
        Self { store }
    }

    /// Insert a new run record
    ///
    /// Submission is idempotent: inserting a run name that already exists
    /// is logged and ignored. Returns whether a record was inserted.
    ///
    /// A record an event or start upserted before submission only gains
    /// the submission fields it lacks; fields already present are kept.
    pub fn create(&self, spec: &RunSpec) -> Result<bool> {
        validate_ws_name(&spec.ws_name)?;
        if spec.run_name.is_empty() {
            return Err(Error::InvalidInput("run name is empty".to_string()));
        }

        let mut record = spec.fields.clone();
        for field in EVENT_ENVELOPE_FIELDS {
            record.remove(*field);
        }
        record.insert(ID_FIELD.to_string(), Value::from(spec.run_name.clone()));
        record.insert("run_name".into(), Value::from(spec.run_name.clone()));
        record.insert(STORED_WS_FIELD.into(), Value::from(spec.ws_name.clone()));
        record.insert("box_name".into(), Value::from(spec.target.name.clone()));
        if let Some(job_id) = &spec.job_id {
            record.insert("job_id".into(), Value::from(job_id.clone()));
        }
        if let Some(node_index) = spec.node_index {
            record.insert("node_index".into(), Value::from(node_index));
        }
        if let Some(run_index) = spec.run_index {
            record.insert("run_index".into(), Value::from(run_index));
        }
        let create_time = spec
            .create_time
            .clone()
            .unwrap_or_else(|| time::format(time::now()));
        record.insert("create_time".into(), Value::from(create_time));
        record.insert("status".into(), Value::from(spec.initial_status().as_str()));
        record.insert("duration".into(), json!(0));

        let store = self.store;
        let ws = spec.ws_name.as_str();
        let inserted = store
            .retry
            .call_ignoring("create_run", || {
                store.backend.insert_one(ws, record.clone())
            })
            .is_some();

        debug!(
            target: "runstore::run",
            ws,
            run = %spec.run_name,
            status = spec.initial_status().as_str(),
            inserted,
            "Created run"
        );
        if !inserted {
            if let Err(e) = self.backfill(ws, &spec.run_name, record) {
                warn!(target: "runstore::run", ws, run = %spec.run_name, error = %e, "Backfill failed");
            }
        }
        Ok(inserted)
    }

    /// `$set` the entries of `record` missing from an existing run record
    fn backfill(&self, ws_name: &str, run_name: &str, record: Document) -> Result<()> {
        let store = self.store;
        let options = FindOptions::new().limit(1);
        let Some(existing) = store
            .retry
            .records("backfill_run", || {
                store.backend.find(ws_name, &id_filter(run_name), &options)
            })?
            .pop()
        else {
            return Ok(());
        };

        let missing: Document = record
            .into_iter()
            .filter(|(key, _)| !existing.contains_key(key))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let fields: Vec<String> = missing.keys().cloned().collect();
        let update = Update::new().set_all(missing);
        store.retry.call("backfill_run", || {
            store
                .backend
                .update_one(ws_name, &id_filter(run_name), &update, false)
        })?;
        debug!(target: "runstore::run", ws = ws_name, run = run_name, ?fields, "Backfilled submission fields");
        Ok(())
    }

    /// Fold a worker event into the run record
    ///
    /// The event is appended to `log_records` and projected onto the
    /// record's fields as two independent writes:
    /// - `hparams` / `metrics`: data leaves set under `hparams.*` / `metrics.*`
    /// - `started`: status becomes `running`
    /// - `status-change`: status becomes `data.status`
    pub fn process_event(&self, ws_name: &str, run_name: &str, event: &RunEvent) -> Result<()> {
        validate_ws_name(ws_name)?;
        let store = self.store;

        if store.config.add_log_records {
            let update = Update::new().push("log_records", event.to_value());
            store.retry.call("process_run_event", || {
                store
                    .backend
                    .update_one(ws_name, &id_filter(run_name), &update, true)
            })?;
        }

        if !store.config.update_run_stats {
            return Ok(());
        }

        let updates = match event.kind() {
            EventKind::Hparams => flatten("hparams", &event.data),
            EventKind::Metrics => flatten("metrics", &event.data),
            EventKind::Started => status_update(RunStatus::Running.as_str()),
            EventKind::StatusChange => {
                let status = get_str(&event.data, "status").ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "status-change event for '{}' has no status",
                        run_name
                    ))
                })?;
                status_update(status)
            }
            EventKind::Other(name) => {
                debug!(target: "runstore::run", ws = ws_name, run = run_name, event = %name, "Event logged only");
                return Ok(());
            }
        };

        if updates.is_empty() {
            return Ok(());
        }
        self.update_run_info(ws_name, run_name, updates)
    }

    /// `$set` fields on a run record, creating it if needed
    pub fn update_run_info(&self, ws_name: &str, run_name: &str, fields: Document) -> Result<()> {
        validate_ws_name(ws_name)?;
        let store = self.store;
        if !store.config.update_run_stats {
            return Ok(());
        }

        let update = Update::new()
            .set_all(fields)
            .set("last_time", time::format(time::now()));
        store.retry.call("update_run_info", || {
            store
                .backend
                .update_one(ws_name, &id_filter(run_name), &update, true)
        })?;
        Ok(())
    }

    /// Record that a run started executing
    ///
    /// Sets `start_time` and `queue_duration`. A run whose record already
    /// carries `queue_duration` or `restarts` was started before, so
    /// `restarts` is incremented. Returns `None` when run stats are disabled.
    pub fn start(&self, ws_name: &str, run_name: &str) -> Result<Option<RunStart>> {
        validate_ws_name(ws_name)?;
        if !self.store.config.update_run_stats {
            return Ok(None);
        }

        let now = time::now();
        let record = self
            .read_fields(ws_name, run_name, &["create_time", "queue_duration", "restarts"])?
            .unwrap_or_default();

        let present = |field: &str| record.get(field).map_or(false, |v| !v.is_null());
        let restarted = present("queue_duration") || present("restarts");
        let restarts = if restarted {
            record.get("restarts").and_then(Value::as_u64).unwrap_or(0) + 1
        } else {
            0
        };
        if restarted {
            warn!(target: "runstore::run", ws = ws_name, run = run_name, restarts, "Restart detected");
        }

        let queue_duration = get_str(&record, "create_time")
            .and_then(time::parse)
            .map(|created| time::seconds_between(created, now))
            .unwrap_or(0.0);

        let start = RunStart {
            start_time: time::format(now),
            queue_duration,
            restarts,
        };
        let mut fields = Document::new();
        fields.insert("start_time".into(), Value::from(start.start_time.clone()));
        fields.insert("queue_duration".into(), json!(start.queue_duration));
        fields.insert("restarts".into(), Value::from(start.restarts));
        self.update_run_info(ws_name, run_name, fields)?;

        debug!(target: "runstore::run", ws = ws_name, run = run_name, queue_duration, "Run started");
        Ok(Some(start))
    }

    /// Record that a run exited
    ///
    /// Allocates the run's `end_id` and writes status, exit code, end time,
    /// `run_duration` (only if the run has a `start_time`) and any final
    /// hparams/metrics leaves in one upsert. Job-level accounting is a
    /// separate call on the job (`JobManager::run_exit`). Returns `None`
    /// when run stats are disabled.
    pub fn exit(&self, ws_name: &str, run_name: &str, exit: &RunExit) -> Result<Option<RunEnd>> {
        validate_ws_name(ws_name)?;
        if !self.store.config.update_run_stats {
            return Ok(None);
        }

        let now = time::now();
        let record = self
            .read_fields(ws_name, run_name, &["start_time"])?
            .unwrap_or_default();
        let run_duration = get_str(&record, "start_time")
            .and_then(time::parse)
            .map(|started| time::seconds_between(started, now));

        let end_id = self.store.sequences().next_end_id(ws_name)?;
        let end_time = time::format(now);

        let mut fields = Document::new();
        fields.insert("status".into(), Value::from(exit.status.as_str()));
        fields.insert("exit_code".into(), Value::from(exit.exit_code));
        fields.insert("end_time".into(), Value::from(end_time.clone()));
        fields.insert("end_id".into(), Value::from(end_id));
        if let Some(duration) = run_duration {
            fields.insert("run_duration".into(), json!(duration));
        }
        if let Some(hparams) = &exit.hparams {
            fields.extend(flatten("hparams", hparams));
        }
        if let Some(metrics) = &exit.metrics {
            fields.extend(flatten("metrics", metrics));
        }
        self.update_run_info(ws_name, run_name, fields)?;

        info!(
            target: "runstore::run",
            ws = ws_name,
            run = run_name,
            status = exit.status.as_str(),
            exit_code = exit.exit_code,
            end_id,
            "Run exited"
        );
        Ok(Some(RunEnd {
            end_id,
            end_time,
            run_duration,
        }))
    }

    /// Set or clear tags on every run matching `filter`
    ///
    /// `tags` maps tag names to values; with `clear` the named tags are
    /// removed instead. Returns the number of records changed, or `None`
    /// when run stats are disabled.
    pub fn set_run_tags(
        &self,
        ws_name: &str,
        filter: &Document,
        tags: &Document,
        clear: bool,
    ) -> Result<Option<u64>> {
        validate_ws_name(ws_name)?;
        let store = self.store;
        if !store.config.update_run_stats {
            return Ok(None);
        }
        let update = tag_update(tags, clear)?;
        let filter = stored_run_filter(filter);
        let result = store.retry.call("set_run_tags", || {
            store.backend.update_many(ws_name, &filter, &update, false)
        })?;
        Ok(Some(result.modified))
    }

    /// Check if a run record exists
    pub fn does_run_exist(&self, ws_name: &str, run_name: &str) -> Result<bool> {
        let records = self.store.query().get_info_for_runs(
            ws_name,
            &id_filter(run_name),
            Some(&doc(json!({"_id": 1}))),
        )?;
        Ok(records.len() == 1)
    }

    /// Number of run records in a workspace
    pub fn run_count(&self, ws_name: &str) -> Result<u64> {
        validate_ws_name(ws_name)?;
        let store = self.store;
        let mut filter = Document::new();
        filter.insert(STORED_WS_FIELD.into(), Value::from(ws_name));
        store
            .retry
            .call("get_run_count", || store.backend.count(ws_name, &filter))
    }

    fn read_fields(
        &self,
        ws_name: &str,
        run_name: &str,
        fields: &[&str],
    ) -> Result<Option<Document>> {
        let store = self.store;
        let projection: Document = fields
            .iter()
            .map(|f| (f.to_string(), json!(1)))
            .collect();
        let options = FindOptions::new().projection(projection).limit(1);
        let mut records = store.retry.records("read_run_fields", || {
            store.backend.find(ws_name, &id_filter(run_name), &options)
        })?;
        Ok(records.pop())
    }
}

fn status_update(status: &str) -> Document {
    let mut fields = Document::new();
    fields.insert("status".into(), Value::from(status));
    fields
}
