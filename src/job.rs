//! One sample's analysis round trip: analyzer → payload → store.
//!
//! A job walks `Invoking → AwaitingPayload → Persisting` and ends in
//! `Succeeded` or `Failed`. It never retries and never returns an error:
//! every path resolves to exactly one `JobOutcome`.

use crate::errors::{InvokeError, StoreError};
use crate::process::ProcessInvoker;
use crate::progress::ProgressChannel;
use crate::store::SampleStore;
use omniqc_common::{Sample, SampleId};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Lifecycle of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    /// Analyzer process running, progress streaming
    Invoking,
    /// Analyzer exited 0; payload being parsed
    AwaitingPayload,
    /// Payload valid; store update in flight
    Persisting,
    Succeeded,
    Failed,
}

/// Why a job did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub enum JobFailure {
    /// Analyzer program could not be launched.
    AnalyzerNotStarted { detail: String },
    /// Analyzer exited non-zero or its output could not be read.
    AnalyzerFailed { detail: String },
    /// Analyzer exited 0 but its payload is not JSON.
    UnreadableOutput { detail: String },
    /// Analyzer killed after the configured timeout.
    TimedOut { after: Duration },
    /// Analyzer killed on request.
    Cancelled,
    /// Metrics computed but the store call failed at the process or
    /// protocol level, so nothing is known to be saved.
    PersistAfterAnalysis { results: Value, detail: String },
    /// Metrics computed but the store refused the update.
    UpdateRejected { results: Value, message: String },
    /// The store accepted the update but returned a record we cannot read.
    SavedResponseMalformed { detail: String },
}

impl JobFailure {
    /// Short user-facing reason.
    pub fn reason(&self) -> String {
        match self {
            JobFailure::AnalyzerNotStarted { .. } => "analyzer could not be started".to_string(),
            JobFailure::AnalyzerFailed { .. } => "analyzer exited abnormally".to_string(),
            JobFailure::UnreadableOutput { .. } => "unreadable analyzer output".to_string(),
            JobFailure::TimedOut { .. } => "analyzer timed out".to_string(),
            JobFailure::Cancelled => "analysis cancelled".to_string(),
            JobFailure::PersistAfterAnalysis { .. } => {
                "analysis succeeded but could not be saved".to_string()
            }
            JobFailure::UpdateRejected { message, .. } => {
                format!("analysis succeeded but update rejected: {}", message)
            }
            JobFailure::SavedResponseMalformed { .. } => {
                "analysis saved but store response was malformed".to_string()
            }
        }
    }

    /// Diagnostic text to show alongside the reason, if any.
    pub fn detail(&self) -> Option<String> {
        match self {
            JobFailure::AnalyzerNotStarted { detail }
            | JobFailure::AnalyzerFailed { detail }
            | JobFailure::UnreadableOutput { detail }
            | JobFailure::PersistAfterAnalysis { detail, .. }
            | JobFailure::SavedResponseMalformed { detail } => Some(detail.clone()),
            JobFailure::TimedOut { after } => Some(format!("no exit after {}s", after.as_secs())),
            JobFailure::Cancelled | JobFailure::UpdateRejected { .. } => None,
        }
    }

    /// Whether the analyzer produced valid metrics. When true the sample's
    /// data is fine and only persistence went wrong.
    pub fn analysis_succeeded(&self) -> bool {
        matches!(
            self,
            JobFailure::PersistAfterAnalysis { .. }
                | JobFailure::UpdateRejected { .. }
                | JobFailure::SavedResponseMalformed { .. }
        )
    }

    /// Metrics that were computed but not durably saved.
    pub fn unsaved_results(&self) -> Option<&Value> {
        match self {
            JobFailure::PersistAfterAnalysis { results, .. }
            | JobFailure::UpdateRejected { results, .. } => Some(results),
            _ => None,
        }
    }

    fn from_invoke(err: InvokeError) -> Self {
        match err {
            InvokeError::Spawn { .. } => JobFailure::AnalyzerNotStarted {
                detail: err.to_string(),
            },
            InvokeError::Io(_) => JobFailure::AnalyzerFailed {
                detail: err.to_string(),
            },
            InvokeError::Exit { code, stderr } => JobFailure::AnalyzerFailed {
                detail: if stderr.trim().is_empty() {
                    format!("exit code {}", code)
                } else {
                    format!("exit code {}: {}", code, stderr.trim())
                },
            },
            InvokeError::PayloadParse { source, .. } => JobFailure::UnreadableOutput {
                detail: source.to_string(),
            },
            InvokeError::Timeout { after } => JobFailure::TimedOut { after },
            InvokeError::Cancelled => JobFailure::Cancelled,
        }
    }

    fn from_store(err: StoreError, results: Value) -> Self {
        match err {
            StoreError::Logic { message } => JobFailure::UpdateRejected { results, message },
            StoreError::UnexpectedData { detail, .. } => {
                JobFailure::SavedResponseMalformed { detail }
            }
            other @ (StoreError::Process(_) | StoreError::Protocol { .. }) => {
                JobFailure::PersistAfterAnalysis {
                    results,
                    detail: other.to_string(),
                }
            }
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.detail() {
            Some(detail) => write!(f, "{} ({})", self.reason(), detail),
            None => write!(f, "{}", self.reason()),
        }
    }
}

/// Resolved result of one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The store's record of the sample after the update
    Succeeded(Sample),
    Failed(JobFailure),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded(_))
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            JobOutcome::Failed(f) => Some(f),
            JobOutcome::Succeeded(_) => None,
        }
    }
}

/// Collaborators shared by every job.
#[derive(Clone)]
pub struct JobContext {
    pub analyzer: ProcessInvoker,
    pub store: Arc<dyn SampleStore>,
    pub progress: ProgressChannel,
}

/// A single analysis of one sample file.
pub struct AnalysisJob {
    sample_id: SampleId,
    file_path: PathBuf,
    state: JobState,
}

impl AnalysisJob {
    pub fn new(sample_id: SampleId, file_path: impl AsRef<Path>) -> Self {
        Self {
            sample_id,
            file_path: file_path.as_ref().to_path_buf(),
            state: JobState::Invoking,
        }
    }

    pub fn for_sample(sample: &Sample) -> Self {
        Self::new(sample.id, &sample.filepath)
    }

    fn transition(&mut self, next: JobState) {
        debug!(from = ?self.state, to = ?next, "job state");
        self.state = next;
    }

    /// Run the job to its single outcome.
    pub async fn run(self, ctx: &JobContext, cancel: &CancellationToken) -> JobOutcome {
        let span = info_span!("analysis_job", sample_id = self.sample_id);
        self.drive(ctx, cancel).instrument(span).await
    }

    async fn drive(mut self, ctx: &JobContext, cancel: &CancellationToken) -> JobOutcome {
        info!(path = %self.file_path.display(), "analysis started");
        let publisher = ctx.progress.publisher(self.sample_id);
        let args = vec![self.file_path.to_string_lossy().into_owned()];

        let output = match ctx.analyzer.run(&args, Some(&publisher), cancel).await {
            Ok(output) => output,
            Err(e) => return self.fail(JobFailure::from_invoke(e)),
        };
        if output.success() {
            self.transition(JobState::AwaitingPayload);
        }
        let results = match output.into_json() {
            Ok(results) => results,
            Err(e) => return self.fail(JobFailure::from_invoke(e)),
        };

        self.transition(JobState::Persisting);
        match ctx.store.update_sample(self.sample_id, &results).await {
            Ok(sample) => {
                self.transition(JobState::Succeeded);
                info!("analysis stored");
                JobOutcome::Succeeded(sample)
            }
            Err(e) => self.fail(JobFailure::from_store(e, results)),
        }
    }

    fn fail(mut self, failure: JobFailure) -> JobOutcome {
        warn!(stage = ?self.state, reason = %failure, "analysis failed");
        self.transition(JobState::Failed);
        JobOutcome::Failed(failure)
    }
}
