//! Typed error hierarchy for the OmniQC orchestration layer.
//!
//! Four enums cover the subsystems:
//! - `InvokeError`: launching a child process and reading its output
//! - `StoreError`: request/response calls against the store process
//! - `ServiceError`: front-end facing operations (validation + store)
//! - `ProgressViolation`: listener-side protocol checks on progress streams
//!
//! Analysis jobs never return these directly; they fold them into a
//! `JobOutcome` value (see `crate::job`).

use omniqc_common::{ProjectId, SampleId};
use std::time::Duration;
use thiserror::Error;

/// Errors from a single child-process invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process exited with code {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    #[error("Process output is not a JSON document: {source}")]
    PayloadParse {
        /// The accumulated payload text that failed to parse
        payload: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Process killed after {}s timeout", after.as_secs())]
    Timeout { after: Duration },

    #[error("Process cancelled")]
    Cancelled,

    #[error("I/O error while reading process output: {0}")]
    Io(#[source] std::io::Error),
}

/// Errors from a store RPC call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be launched, exited non-zero, timed out or was cancelled.
    #[error("Store process failed: {0}")]
    Process(#[source] InvokeError),

    /// Zero exit, but stdout was not a valid response document.
    #[error("Store returned an unreadable response: {detail}")]
    Protocol { detail: String, output: String },

    /// The store answered `status: error`.
    #[error("Store rejected the request: {message}")]
    Logic { message: String },

    /// `status: success`, but `data` does not have the shape the command returns.
    #[error("Store response data for '{command}' has an unexpected shape: {detail}")]
    UnexpectedData { command: String, detail: String },
}

/// Errors from the front-end facing service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Project name must not be empty")]
    EmptyProjectName,

    #[error("A project named \"{name}\" already exists")]
    DuplicateProjectName { name: String },

    #[error("Project {id} not found")]
    UnknownProject { id: ProjectId },

    #[error("Sample {id} not found")]
    UnknownSample { id: SampleId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A progress stream for one job went backwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Progress for sample {sample_id} went backwards: {previous}% -> {received}%")]
pub struct ProgressViolation {
    pub sample_id: SampleId,
    pub previous: u8,
    pub received: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_error_spawn_carries_program() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = InvokeError::Spawn {
            program: "fastq_parser".into(),
            source: io_err,
        };
        match &err {
            InvokeError::Spawn { program, source } => {
                assert_eq!(program, "fastq_parser");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected Spawn variant"),
        }
        assert!(err.to_string().contains("fastq_parser"));
    }

    #[test]
    fn invoke_error_exit_reports_code() {
        let err = InvokeError::Exit {
            code: 2,
            stderr: "Traceback".into(),
        };
        assert!(err.to_string().contains("code 2"));
    }

    #[test]
    fn invoke_error_timeout_reports_seconds() {
        let err = InvokeError::Timeout {
            after: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn store_error_variants_are_distinct() {
        let process = StoreError::Process(InvokeError::Cancelled);
        let protocol = StoreError::Protocol {
            detail: "eof".into(),
            output: String::new(),
        };
        let logic = StoreError::Logic {
            message: "not found".into(),
        };
        assert!(matches!(process, StoreError::Process(_)));
        assert!(matches!(protocol, StoreError::Protocol { .. }));
        assert!(matches!(logic, StoreError::Logic { .. }));
    }

    #[test]
    fn service_error_converts_from_store_error() {
        let inner = StoreError::Logic {
            message: "UNIQUE constraint failed".into(),
        };
        let err: ServiceError = inner.into();
        match &err {
            ServiceError::Store(StoreError::Logic { message }) => {
                assert_eq!(message, "UNIQUE constraint failed");
            }
            _ => panic!("Expected ServiceError::Store(Logic)"),
        }
    }

    #[test]
    fn progress_violation_message_names_both_values() {
        let v = ProgressViolation {
            sample_id: 4,
            previous: 60,
            received: 20,
        };
        let msg = v.to_string();
        assert!(msg.contains("60%") && msg.contains("20%"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&InvokeError::Cancelled);
        assert_std_error(&StoreError::Logic { message: "x".into() });
        assert_std_error(&ServiceError::EmptyProjectName);
    }
}
