//! Run and job domain types
//!
//! ## Run lifecycle
//!
//! ```text
//! created / allocating ──start──▶ running ──exit──▶ completed | error | cancelled
//!                                    ▲   │
//!                                    └───┘ restart (preempted, rescheduled)
//! ```
//!
//! ## Job lifecycle
//!
//! `created` ──first node_start──▶ `running` ──last node_exit──▶ `completed`

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::error::Error;

/// Fields that belong to the event envelope rather than the run record
pub const EVENT_ENVELOPE_FIELDS: &[&str] = &["event", "time"];

/// Run status as persisted on the run record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Submitted, waiting for a compute slot
    Created,
    /// Submitted to a pre-provisioned batch pool, waiting for a node
    Allocating,
    /// Executing on a worker
    Running,
    /// Finished normally
    Completed,
    /// Finished with an error
    Error,
    /// Cancelled by the user
    Cancelled,
}

impl RunStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Allocating => "allocating",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Check if the run has finished
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Error | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(RunStatus::Created),
            "allocating" => Ok(RunStatus::Allocating),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "error" => Ok(RunStatus::Error),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(Error::InvalidInput(format!("unknown run status '{}'", other))),
        }
    }
}

/// Job status as persisted on the job record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Submitted, no node running yet
    Created,
    /// At least one node has started
    Running,
    /// The last running node has exited
    Completed,
}

impl JobStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            other => Err(Error::InvalidInput(format!("unknown job status '{}'", other))),
        }
    }
}

/// Where a run executes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeTarget {
    /// Target name (box or pool name)
    pub name: String,
    /// Nodes are pre-provisioned in a batch pool, so new runs start out `allocating`
    pub batch_pool: bool,
}

impl ComputeTarget {
    /// A local or otherwise directly scheduled target
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_pool: false,
        }
    }

    /// A pre-provisioned batch pool target
    pub fn batch(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_pool: true,
        }
    }
}

/// Everything known about a run at submission time
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    /// Run name, unique within the workspace
    pub run_name: String,
    /// Owning workspace
    pub ws_name: String,
    /// Job that spawned the run
    pub job_id: Option<String>,
    /// Index of the compute node within the job
    pub node_index: Option<u32>,
    /// Index of the run within the job
    pub run_index: Option<u32>,
    /// Compute target
    pub target: ComputeTarget,
    /// Submission time (RFC 3339)
    pub create_time: Option<String>,
    /// Additional submission fields, copied onto the record
    pub fields: Document,
}

impl RunSpec {
    /// Create a spec with only the required fields
    pub fn new(ws_name: impl Into<String>, run_name: impl Into<String>, target: ComputeTarget) -> Self {
        Self {
            run_name: run_name.into(),
            ws_name: ws_name.into(),
            job_id: None,
            node_index: None,
            run_index: None,
            target,
            create_time: None,
            fields: Document::new(),
        }
    }

    /// Set the job id
    pub fn job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Set node and run indexes
    pub fn indexes(mut self, node_index: u32, run_index: u32) -> Self {
        self.node_index = Some(node_index);
        self.run_index = Some(run_index);
        self
    }

    /// Set the submission time
    pub fn created_at(mut self, create_time: impl Into<String>) -> Self {
        self.create_time = Some(create_time.into());
        self
    }

    /// Add an extra field
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Status a freshly inserted record starts in
    pub fn initial_status(&self) -> RunStatus {
        if self.target.batch_pool {
            RunStatus::Allocating
        } else {
            RunStatus::Created
        }
    }
}

/// Kind of a streamed run event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Hyperparameter report; data is merged into `hparams.*`
    Hparams,
    /// Metrics report; data is merged into `metrics.*`
    Metrics,
    /// The run started executing
    Started,
    /// Explicit status change; data carries `status`
    StatusChange,
    /// Anything else; logged only
    Other(String),
}

impl EventKind {
    /// Parse an event name
    pub fn parse(name: &str) -> Self {
        match name {
            "hparams" => EventKind::Hparams,
            "metrics" => EventKind::Metrics,
            "started" => EventKind::Started,
            "status-change" => EventKind::StatusChange,
            other => EventKind::Other(other.to_string()),
        }
    }
}

/// A structured event emitted by a running worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Event name (`hparams`, `metrics`, `started`, `status-change`, ...)
    pub event: String,
    /// Time the worker emitted the event (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Event payload
    #[serde(default)]
    pub data: Document,
    /// Any other envelope keys the worker sent, kept for `log_records`
    #[serde(flatten)]
    pub extra: Document,
}

impl RunEvent {
    /// Create an event stamped with the current time
    pub fn new(event: impl Into<String>, data: Document) -> Self {
        Self {
            event: event.into(),
            time: Some(crate::time::format(crate::time::now())),
            data,
            extra: Document::new(),
        }
    }

    /// Parsed event kind
    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event)
    }

    /// The event as appended to `log_records`, extra envelope keys included
    pub fn to_value(&self) -> Value {
        let mut out = Document::new();
        out.insert("event".into(), Value::from(self.event.clone()));
        if let Some(time) = &self.time {
            out.insert("time".into(), Value::from(time.clone()));
        }
        out.insert("data".into(), Value::Object(self.data.clone()));
        for (key, value) in &self.extra {
            out.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(out)
    }
}

/// Final values reported when a run exits
#[derive(Debug, Clone, PartialEq)]
pub struct RunExit {
    /// Terminal status
    pub status: RunStatus,
    /// Process exit code
    pub exit_code: i32,
    /// Final hyperparameters, merged per leaf
    pub hparams: Option<Document>,
    /// Final metrics, merged per leaf
    pub metrics: Option<Document>,
}

impl RunExit {
    /// Exit with a status derived from the exit code
    pub fn from_exit_code(exit_code: i32) -> Self {
        Self {
            status: if exit_code == 0 {
                RunStatus::Completed
            } else {
                RunStatus::Error
            },
            exit_code,
            hparams: None,
            metrics: None,
        }
    }

    /// Attach final metrics
    pub fn with_metrics(mut self, metrics: Document) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Attach final hyperparameters
    pub fn with_hparams(mut self, hparams: Document) -> Self {
        self.hparams = Some(hparams);
        self
    }
}
