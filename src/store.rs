//! Request/response client for the store process.
//!
//! Every call spawns the store once with `<command> --flag value ...` and
//! expects exactly one JSON document `{status, data?, message?}` on stdout.
//! There is no streaming and no progress. Calls are not serialized against
//! each other; consistency across concurrent calls is the store's concern.

use crate::errors::{InvokeError, StoreError};
use crate::process::{CommandSpec, Framing, ProcessInvoker};
use async_trait::async_trait;
use omniqc_common::{Project, ProjectId, RpcRequest, RpcResponse, Sample, SampleId};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The store's command vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    Init,
    GetProjects,
    CreateProject {
        name: String,
    },
    AddSample {
        project_id: ProjectId,
        filename: String,
        filepath: String,
    },
    UpdateSample {
        sample_id: SampleId,
        results: Value,
    },
    DeleteProject {
        project_id: ProjectId,
    },
    DeleteSample {
        sample_id: SampleId,
    },
}

impl StoreCommand {
    pub fn name(&self) -> &'static str {
        match self {
            StoreCommand::Init => "init",
            StoreCommand::GetProjects => "get_projects",
            StoreCommand::CreateProject { .. } => "create_project",
            StoreCommand::AddSample { .. } => "add_sample",
            StoreCommand::UpdateSample { .. } => "update_sample",
            StoreCommand::DeleteProject { .. } => "delete_project",
            StoreCommand::DeleteSample { .. } => "delete_sample",
        }
    }

    pub fn to_request(&self) -> RpcRequest {
        let req = RpcRequest::new(self.name());
        match self {
            StoreCommand::Init | StoreCommand::GetProjects => req,
            StoreCommand::CreateProject { name } => req.arg("name", name),
            StoreCommand::AddSample {
                project_id,
                filename,
                filepath,
            } => req
                .arg("project_id", project_id)
                .arg("filename", filename)
                .arg("filepath", filepath),
            StoreCommand::UpdateSample { sample_id, results } => req
                .arg("sample_id", sample_id)
                .arg("results", results.to_string()),
            StoreCommand::DeleteProject { project_id } => req.arg("project_id", project_id),
            StoreCommand::DeleteSample { sample_id } => req.arg("sample_id", sample_id),
        }
    }
}

/// Persistence operations the orchestration layer needs.
///
/// Real implementation: `StoreClient`. Tests substitute an in-memory double.
#[async_trait]
pub trait SampleStore: Send + Sync {
    async fn init(&self) -> Result<String, StoreError>;

    async fn get_projects(&self) -> Result<Vec<Project>, StoreError>;

    async fn create_project(&self, name: &str) -> Result<Project, StoreError>;

    async fn add_sample(
        &self,
        project_id: ProjectId,
        filename: &str,
        filepath: &str,
    ) -> Result<Sample, StoreError>;

    /// Overwrite a sample's results; returns the stored record.
    async fn update_sample(
        &self,
        sample_id: SampleId,
        results: &Value,
    ) -> Result<Sample, StoreError>;

    async fn delete_project(&self, project_id: ProjectId) -> Result<String, StoreError>;

    async fn delete_sample(&self, sample_id: SampleId) -> Result<String, StoreError>;
}

/// `SampleStore` backed by the external store process.
#[derive(Debug, Clone)]
pub struct StoreClient {
    invoker: ProcessInvoker,
    shutdown: CancellationToken,
}

impl StoreClient {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            invoker: ProcessInvoker::new(spec, Framing::Raw),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.invoker = self.invoker.with_timeout(timeout);
        self
    }

    pub fn with_working_dir(mut self, dir: impl AsRef<std::path::Path>) -> Self {
        self.invoker = self.invoker.with_working_dir(dir);
        self
    }

    /// Token that aborts any in-flight store call when cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Issue one command and return the successful response document.
    pub async fn call(&self, command: &StoreCommand) -> Result<RpcResponse, StoreError> {
        let request = command.to_request();
        debug!(command = %request.command, "store call");

        let output = self
            .invoker
            .run(&request.to_args(), None, &self.shutdown)
            .await
            .map_err(StoreError::Process)?;

        if !output.success() {
            return Err(StoreError::Process(InvokeError::Exit {
                code: output.exit_code,
                stderr: output.stderr,
            }));
        }

        let response = decode_response(&output.payload)?;
        if !response.is_success() {
            let message = response
                .message
                .unwrap_or_else(|| "store reported an error without a message".to_string());
            warn!(command = %request.command, %message, "store rejected request");
            return Err(StoreError::Logic { message });
        }
        Ok(response)
    }

    async fn call_for<T: DeserializeOwned>(&self, command: StoreCommand) -> Result<T, StoreError> {
        let response = self.call(&command).await?;
        decode_data(command.name(), response)
    }

    async fn call_for_message(&self, command: StoreCommand) -> Result<String, StoreError> {
        let response = self.call(&command).await?;
        Ok(response.message.unwrap_or_default())
    }
}

/// Parse stdout as exactly one response document.
pub fn decode_response(output: &str) -> Result<RpcResponse, StoreError> {
    serde_json::from_str(output.trim()).map_err(|e| StoreError::Protocol {
        detail: e.to_string(),
        output: output.to_string(),
    })
}

/// Decode the `data` member of a successful response.
pub fn decode_data<T: DeserializeOwned>(
    command: &str,
    response: RpcResponse,
) -> Result<T, StoreError> {
    let data = response.data.unwrap_or(Value::Null);
    serde_json::from_value(data).map_err(|e| StoreError::UnexpectedData {
        command: command.to_string(),
        detail: e.to_string(),
    })
}

#[async_trait]
impl SampleStore for StoreClient {
    async fn init(&self) -> Result<String, StoreError> {
        self.call_for_message(StoreCommand::Init).await
    }

    async fn get_projects(&self) -> Result<Vec<Project>, StoreError> {
        self.call_for(StoreCommand::GetProjects).await
    }

    async fn create_project(&self, name: &str) -> Result<Project, StoreError> {
        self.call_for(StoreCommand::CreateProject {
            name: name.to_string(),
        })
        .await
    }

    async fn add_sample(
        &self,
        project_id: ProjectId,
        filename: &str,
        filepath: &str,
    ) -> Result<Sample, StoreError> {
        self.call_for(StoreCommand::AddSample {
            project_id,
            filename: filename.to_string(),
            filepath: filepath.to_string(),
        })
        .await
    }

    async fn update_sample(
        &self,
        sample_id: SampleId,
        results: &Value,
    ) -> Result<Sample, StoreError> {
        self.call_for(StoreCommand::UpdateSample {
            sample_id,
            results: results.clone(),
        })
        .await
    }

    async fn delete_project(&self, project_id: ProjectId) -> Result<String, StoreError> {
        self.call_for_message(StoreCommand::DeleteProject { project_id })
            .await
    }

    async fn delete_sample(&self, sample_id: SampleId) -> Result<String, StoreError> {
        self.call_for_message(StoreCommand::DeleteSample { sample_id })
            .await
    }
}
