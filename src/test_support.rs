//! Helpers shared by unit tests: fake analyzer and store executables.

use crate::errors::{InvokeError, StoreError};
use crate::store::SampleStore;
use async_trait::async_trait;
use omniqc_common::{Project, ProjectId, Sample, SampleId};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Write an executable shell script into `dir`.
pub fn create_test_script(dir: &Path, name: &str, content: &str) -> PathBuf {
    let script_path = dir.join(name);
    std::fs::write(&script_path, content).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script_path, perms).unwrap();
    }
    script_path
}

/// A store script that answers every command with `response` and exit 0.
pub fn store_script(dir: &Path, response: &str) -> PathBuf {
    create_test_script(
        dir,
        "store.sh",
        &format!("#!/bin/sh\ncat <<'JSON'\n{}\nJSON\n", response),
    )
}

/// How `MockStore::update_sample` answers.
#[derive(Debug, Clone)]
pub enum UpdateBehavior {
    Accept,
    ProcessFailure,
    ProtocolFailure,
    Reject(String),
    MalformedRecord,
}

#[derive(Debug)]
struct MockState {
    projects: Vec<Project>,
    calls: Vec<String>,
    next_id: i64,
    update: UpdateBehavior,
}

/// In-memory `SampleStore` that records every call.
#[derive(Debug)]
pub struct MockStore {
    state: Mutex<MockState>,
}

impl MockStore {
    pub fn new(projects: Vec<Project>) -> Self {
        Self {
            state: Mutex::new(MockState {
                projects,
                calls: Vec::new(),
                next_id: 100,
                update: UpdateBehavior::Accept,
            }),
        }
    }

    pub fn with_update_behavior(self, update: UpdateBehavior) -> Self {
        self.state.lock().unwrap().update = update;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == name).count()
    }

    pub fn sample(&self, sample_id: SampleId) -> Option<Sample> {
        let state = self.state.lock().unwrap();
        state
            .projects
            .iter()
            .flat_map(|p| p.samples.iter())
            .find(|s| s.id == sample_id)
            .cloned()
    }
}

/// A pending sample record for tests.
pub fn pending_sample(id: SampleId, project_id: ProjectId, filepath: &str) -> Sample {
    Sample {
        id,
        project_id,
        filename: Path::new(filepath)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        filepath: filepath.to_string(),
        upload_date: "2024-01-01T00:00:00".to_string(),
        analysis_results: None,
    }
}

pub fn project(id: ProjectId, name: &str, samples: Vec<Sample>) -> Project {
    Project {
        id,
        name: name.to_string(),
        created_at: "2024-01-01T00:00:00".to_string(),
        samples,
    }
}

#[async_trait]
impl SampleStore for MockStore {
    async fn init(&self) -> Result<String, StoreError> {
        self.state.lock().unwrap().calls.push("init".into());
        Ok("Database initialized".into())
    }

    async fn get_projects(&self) -> Result<Vec<Project>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("get_projects".into());
        Ok(state.projects.clone())
    }

    async fn create_project(&self, name: &str) -> Result<Project, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("create_project".into());
        state.next_id += 1;
        let created = project(state.next_id, name, vec![]);
        state.projects.push(created.clone());
        Ok(created)
    }

    async fn add_sample(
        &self,
        project_id: ProjectId,
        filename: &str,
        filepath: &str,
    ) -> Result<Sample, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("add_sample".into());
        state.next_id += 1;
        let mut sample = pending_sample(state.next_id, project_id, filepath);
        sample.filename = filename.to_string();
        let Some(owner) = state.projects.iter_mut().find(|p| p.id == project_id) else {
            return Err(StoreError::Logic {
                message: "FOREIGN KEY constraint failed".into(),
            });
        };
        owner.samples.push(sample.clone());
        Ok(sample)
    }

    async fn update_sample(
        &self,
        sample_id: SampleId,
        results: &Value,
    ) -> Result<Sample, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("update_sample".into());
        match state.update.clone() {
            UpdateBehavior::Accept => {}
            UpdateBehavior::ProcessFailure => {
                return Err(StoreError::Process(InvokeError::Exit {
                    code: 1,
                    stderr: "disk I/O error".into(),
                }));
            }
            UpdateBehavior::ProtocolFailure => {
                return Err(StoreError::Protocol {
                    detail: "expected value".into(),
                    output: "garbage".into(),
                });
            }
            UpdateBehavior::Reject(message) => return Err(StoreError::Logic { message }),
            UpdateBehavior::MalformedRecord => {
                return Err(StoreError::UnexpectedData {
                    command: "update_sample".into(),
                    detail: "missing field `id`".into(),
                });
            }
        }
        let sample = state
            .projects
            .iter_mut()
            .flat_map(|p| p.samples.iter_mut())
            .find(|s| s.id == sample_id)
            .ok_or_else(|| StoreError::Logic {
                message: format!("Sample {} not found", sample_id),
            })?;
        sample.analysis_results = Some(results.clone());
        Ok(sample.clone())
    }

    async fn delete_project(&self, project_id: ProjectId) -> Result<String, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("delete_project".into());
        state.projects.retain(|p| p.id != project_id);
        Ok(format!("Project {} deleted", project_id))
    }

    async fn delete_sample(&self, sample_id: SampleId) -> Result<String, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("delete_sample".into());
        for p in state.projects.iter_mut() {
            p.samples.retain(|s| s.id != sample_id);
        }
        Ok(format!("Sample {} deleted", sample_id))
    }
}
