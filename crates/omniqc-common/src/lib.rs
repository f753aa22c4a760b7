//! Shared domain types for OmniQC.
//!
//! These are the records exchanged with the store process and the events
//! pushed from the process layer to a front-end. They carry no behavior
//! beyond small helpers so that any front-end can depend on them without
//! pulling in the async runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store-assigned identifier of a project.
pub type ProjectId = i64;

/// Store-assigned identifier of a sample. Also the job id for progress events.
pub type SampleId = i64;

/// A named collection of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// ISO-8601 timestamp as written by the store
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub samples: Vec<Sample>,
}

impl Project {
    /// Samples that have no stored analysis results yet, in project order.
    pub fn pending_samples(&self) -> Vec<&Sample> {
        self.samples.iter().filter(|s| s.is_pending()).collect()
    }

    /// Whether `name` collides with this project's name (trimmed, case-insensitive).
    pub fn has_name(&self, name: &str) -> bool {
        normalize_project_name(&self.name) == normalize_project_name(name)
    }
}

/// One sequencing file registered in a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: SampleId,
    pub project_id: ProjectId,
    pub filename: String,
    /// Absolute path of the file on disk
    pub filepath: String,
    #[serde(default)]
    pub upload_date: String,
    /// Opaque metrics payload, present only after a successful analysis
    #[serde(default)]
    pub analysis_results: Option<Value>,
}

impl Sample {
    /// A sample is pending until a results payload has been persisted.
    pub fn is_pending(&self) -> bool {
        matches!(self.analysis_results, None | Some(Value::Null))
    }
}

/// Canonical form used for project-name uniqueness.
pub fn normalize_project_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A progress tick for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub sample_id: SampleId,
    pub percent: u8,
}

impl ProgressEvent {
    pub fn new(sample_id: SampleId, percent: u8) -> Self {
        Self { sample_id, percent }
    }
}

/// A store command: name plus ordered `--flag value` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    pub command: String,
    pub args: Vec<(String, String)>,
}

impl RpcRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Append a `--flag value` pair, keeping insertion order.
    pub fn arg(mut self, flag: impl Into<String>, value: impl ToString) -> Self {
        self.args.push((flag.into(), value.to_string()));
        self
    }

    /// Render as process arguments: the command first, then each pair.
    pub fn to_args(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(1 + self.args.len() * 2);
        out.push(self.command.clone());
        for (flag, value) in &self.args {
            out.push(format!("--{}", flag));
            out.push(value.clone());
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcStatus {
    Success,
    Error,
}

/// The single JSON document a store invocation prints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub status: RpcStatus,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RpcResponse {
    pub fn is_success(&self) -> bool {
        self.status == RpcStatus::Success
    }
}
