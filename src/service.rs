//! The job-facing API a front-end drives.
//!
//! `QcService` bundles the analyzer invoker, the store, the progress bus
//! and the batch scheduler, and keeps a snapshot of the last project list
//! it saw. Store operations pass straight through; name validation and
//! snapshot bookkeeping happen here.

use crate::batch::{BatchEvent, BatchOutcome, BatchScheduler};
use crate::config::Config;
use crate::errors::ServiceError;
use crate::job::{AnalysisJob, JobContext, JobOutcome};
use crate::process::{Framing, ProcessInvoker};
use crate::progress::{ProgressChannel, Subscription, SubscriptionId};
use crate::store::{SampleStore, StoreClient};
use omniqc_common::{Project, ProjectId, Sample, SampleId, normalize_project_name};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Last known project list, shared between the service and the scheduler.
#[derive(Debug, Clone, Default)]
pub struct ProjectSnapshot {
    inner: Arc<RwLock<Option<Vec<Project>>>>,
}

impl ProjectSnapshot {
    fn read(&self) -> RwLockReadGuard<'_, Option<Vec<Project>>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Vec<Project>>> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a project list has been loaded at least once.
    pub fn is_loaded(&self) -> bool {
        self.read().is_some()
    }

    pub fn replace(&self, projects: Vec<Project>) {
        *self.write() = Some(projects);
    }

    pub fn project(&self, id: ProjectId) -> Option<Project> {
        self.read()
            .as_ref()?
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn find_sample(&self, id: SampleId) -> Option<Sample> {
        self.read()
            .as_ref()?
            .iter()
            .flat_map(|p| p.samples.iter())
            .find(|s| s.id == id)
            .cloned()
    }

    /// Case-insensitive, whitespace-insensitive name lookup.
    pub fn has_name(&self, name: &str) -> bool {
        self.read()
            .as_ref()
            .is_some_and(|projects| projects.iter().any(|p| p.has_name(name)))
    }

    pub fn insert(&self, project: Project) {
        self.write().get_or_insert_with(Vec::new).push(project);
    }

    pub fn remove_project(&self, id: ProjectId) {
        if let Some(projects) = self.write().as_mut() {
            projects.retain(|p| p.id != id);
        }
    }

    pub fn add_sample(&self, sample: Sample) {
        if let Some(projects) = self.write().as_mut()
            && let Some(owner) = projects.iter_mut().find(|p| p.id == sample.project_id)
        {
            owner.samples.retain(|s| s.id != sample.id);
            owner.samples.push(sample);
        }
    }

    /// Replace a sample record in place, if it is known.
    pub fn update_sample(&self, sample: Sample) {
        if let Some(projects) = self.write().as_mut()
            && let Some(slot) = projects
                .iter_mut()
                .flat_map(|p| p.samples.iter_mut())
                .find(|s| s.id == sample.id)
        {
            *slot = sample;
        }
    }

    pub fn remove_sample(&self, id: SampleId) {
        if let Some(projects) = self.write().as_mut() {
            for project in projects.iter_mut() {
                project.samples.retain(|s| s.id != id);
            }
        }
    }
}

/// Result of one file in a bulk upload.
#[derive(Debug)]
pub struct SampleUpload {
    pub path: PathBuf,
    pub result: Result<Sample, ServiceError>,
}

/// Filename and absolute path the store records for an uploaded file.
pub fn upload_fields(path: &Path) -> (String, String) {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let filename = absolute
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| absolute.to_string_lossy().into_owned());
    (filename, absolute.to_string_lossy().into_owned())
}

/// Orchestration entry point for a front-end.
pub struct QcService {
    ctx: JobContext,
    scheduler: BatchScheduler,
    snapshot: ProjectSnapshot,
    shutdown: CancellationToken,
}

impl QcService {
    pub fn new(ctx: JobContext) -> Self {
        let snapshot = ProjectSnapshot::default();
        Self {
            scheduler: BatchScheduler::new(ctx.clone()).with_snapshot(snapshot.clone()),
            ctx,
            snapshot,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the service from resolved configuration, wired to the real
    /// analyzer and store executables.
    pub fn from_config(config: &Config) -> Self {
        let shutdown = CancellationToken::new();
        let store = StoreClient::new(config.store.clone())
            .with_timeout(config.store_timeout)
            .with_working_dir(&config.project_dir)
            .with_shutdown(shutdown.clone());
        let analyzer = ProcessInvoker::new(
            config.analyzer.clone(),
            Framing::Lines(config.fragment_policy),
        )
        .with_timeout(config.analyzer_timeout)
        .with_working_dir(&config.project_dir);

        Self::new(JobContext {
            analyzer,
            store: Arc::new(store),
            progress: ProgressChannel::new(),
        })
        .with_shutdown(shutdown)
    }

    /// Publish batch events on `tx`.
    pub fn with_batch_events(mut self, tx: mpsc::Sender<BatchEvent>) -> Self {
        self.scheduler = self.scheduler.with_event_channel(tx);
        self
    }

    /// Token whose cancellation aborts running jobs and batches.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn snapshot(&self) -> &ProjectSnapshot {
        &self.snapshot
    }

    pub fn progress(&self) -> &ProgressChannel {
        &self.ctx.progress
    }

    fn store(&self) -> &dyn SampleStore {
        self.ctx.store.as_ref()
    }

    /// Prepare the store. A failure is logged and the service stays usable.
    pub async fn init(&self) -> bool {
        match self.store().init().await {
            Ok(message) => {
                info!(%message, "store initialized");
                true
            }
            Err(e) => {
                warn!(error = %e, "store initialization failed");
                false
            }
        }
    }

    /// Analyze one sample file. On success the snapshot holds the stored record.
    pub async fn analyze_sample(
        &self,
        file_path: impl AsRef<Path>,
        sample_id: SampleId,
    ) -> JobOutcome {
        let outcome = AnalysisJob::new(sample_id, file_path)
            .run(&self.ctx, &self.shutdown)
            .await;
        if let JobOutcome::Succeeded(sample) = &outcome {
            self.snapshot.update_sample(sample.clone());
        }
        outcome
    }

    /// Analyze every sample of `project` that has no results yet, one at a time.
    pub async fn analyze_all_pending(&self, project: &Project) -> BatchOutcome {
        self.scheduler
            .analyze_all_pending(project, &self.shutdown)
            .await
    }

    /// Fetch the project list and make it the current snapshot.
    pub async fn get_projects(&self) -> Result<Vec<Project>, ServiceError> {
        let projects = self.store().get_projects().await?;
        debug!(count = projects.len(), "projects loaded");
        self.snapshot.replace(projects.clone());
        Ok(projects)
    }

    async fn ensure_loaded(&self) -> Result<(), ServiceError> {
        if !self.snapshot.is_loaded() {
            self.get_projects().await?;
        }
        Ok(())
    }

    /// Create a project. The name is trimmed; empty names and names already
    /// in the snapshot (ignoring case) are rejected without a store call.
    pub async fn create_project(&self, name: &str) -> Result<Project, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::EmptyProjectName);
        }
        self.ensure_loaded().await?;
        if self.snapshot.has_name(name) {
            return Err(ServiceError::DuplicateProjectName {
                name: normalize_project_name(name),
            });
        }

        let project = self.store().create_project(name).await?;
        info!(project_id = project.id, name = %project.name, "project created");
        self.snapshot.insert(project.clone());
        Ok(project)
    }

    pub async fn add_sample(
        &self,
        project_id: ProjectId,
        filename: &str,
        filepath: &str,
    ) -> Result<Sample, ServiceError> {
        let sample = self
            .store()
            .add_sample(project_id, filename, filepath)
            .await?;
        debug!(sample_id = sample.id, project_id, "sample added");
        self.snapshot.add_sample(sample.clone());
        Ok(sample)
    }

    /// Register each file as a sample of `project_id`. Files are added
    /// independently; one failure does not stop the rest.
    pub async fn add_samples(&self, project_id: ProjectId, paths: &[PathBuf]) -> Vec<SampleUpload> {
        let mut uploads = Vec::with_capacity(paths.len());
        for path in paths {
            let (filename, filepath) = upload_fields(path);
            let result = self.add_sample(project_id, &filename, &filepath).await;
            if let Err(e) = &result {
                warn!(path = %path.display(), error = %e, "sample upload failed");
            }
            uploads.push(SampleUpload {
                path: path.clone(),
                result,
            });
        }
        uploads
    }

    pub async fn delete_project(&self, project_id: ProjectId) -> Result<String, ServiceError> {
        let message = self.store().delete_project(project_id).await?;
        self.snapshot.remove_project(project_id);
        Ok(message)
    }

    pub async fn delete_sample(&self, sample_id: SampleId) -> Result<String, ServiceError> {
        let message = self.store().delete_sample(sample_id).await?;
        self.snapshot.remove_sample(sample_id);
        Ok(message)
    }

    /// Look a project up in the snapshot, re-reading the store on a miss.
    pub async fn find_project(&self, project_id: ProjectId) -> Result<Project, ServiceError> {
        if let Some(project) = self.snapshot.project(project_id) {
            return Ok(project);
        }
        self.get_projects().await?;
        self.snapshot
            .project(project_id)
            .ok_or(ServiceError::UnknownProject { id: project_id })
    }

    /// Look a sample up in the snapshot, re-reading the store on a miss.
    pub async fn find_sample(&self, sample_id: SampleId) -> Result<Sample, ServiceError> {
        if let Some(sample) = self.snapshot.find_sample(sample_id) {
            return Ok(sample);
        }
        self.get_projects().await?;
        self.snapshot
            .find_sample(sample_id)
            .ok_or(ServiceError::UnknownSample { id: sample_id })
    }

    /// Receive progress for every job.
    pub fn subscribe_progress(&self) -> Subscription {
        self.ctx.progress.subscribe()
    }

    /// Receive progress for one sample only.
    pub fn subscribe_sample(&self, sample_id: SampleId) -> Subscription {
        self.ctx.progress.subscribe_to(sample_id)
    }

    pub fn unsubscribe_progress(&self, id: SubscriptionId) -> bool {
        self.ctx.progress.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::process::CommandSpec;
    use crate::protocol::FragmentPolicy;
    use crate::test_support::{MockStore, pending_sample, project};
    use serde_json::json;

    fn service_with(store: Arc<MockStore>, analyzer: PathBuf) -> QcService {
        QcService::new(JobContext {
            analyzer: ProcessInvoker::new(
                CommandSpec::new(analyzer),
                Framing::Lines(FragmentPolicy::Drop),
            ),
            store,
            progress: ProgressChannel::new(),
        })
    }

    fn service(store: Arc<MockStore>) -> QcService {
        service_with(store, PathBuf::from("/nonexistent/analyzer"))
    }

    #[test]
    fn test_snapshot_bookkeeping() {
        let snapshot = ProjectSnapshot::default();
        assert!(!snapshot.is_loaded());
        assert!(!snapshot.has_name("Alpha"));

        snapshot.replace(vec![project(1, "Alpha", vec![pending_sample(5, 1, "/d/a.fastq")])]);
        assert!(snapshot.has_name("  alpha "));

        let mut done = pending_sample(5, 1, "/d/a.fastq");
        done.analysis_results = Some(json!({"total_reads": 3}));
        snapshot.update_sample(done);
        assert!(snapshot.find_sample(5).unwrap().analysis_results.is_some());

        snapshot.remove_sample(5);
        assert!(snapshot.find_sample(5).is_none());
        snapshot.remove_project(1);
        assert!(snapshot.project(1).is_none());
        assert!(snapshot.is_loaded());
    }

    #[test]
    fn test_upload_fields_use_last_component() {
        let (filename, filepath) = upload_fields(Path::new("/data/run1/sample_A.fastq"));
        assert_eq!(filename, "sample_A.fastq");
        assert_eq!(filepath, "/data/run1/sample_A.fastq");

        let (filename, filepath) = upload_fields(Path::new("reads.fq"));
        assert_eq!(filename, "reads.fq");
        assert!(Path::new(&filepath).is_absolute());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_before_store() {
        let store = Arc::new(MockStore::new(vec![]));
        let svc = service(store.clone());

        let created = svc.create_project("Alpha").await.unwrap();
        assert_eq!(created.name, "Alpha");

        let err = svc.create_project("alpha ").await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateProjectName { .. }));
        assert_eq!(store.count_calls("create_project"), 1);
    }

    #[tokio::test]
    async fn test_name_is_trimmed_and_empty_rejected() {
        let store = Arc::new(MockStore::new(vec![]));
        let svc = service(store.clone());

        let err = svc.create_project("   ").await.unwrap_err();
        assert!(matches!(err, ServiceError::EmptyProjectName));
        assert!(store.calls().is_empty());

        let created = svc.create_project("  Beta  ").await.unwrap();
        assert_eq!(created.name, "Beta");
    }

    #[tokio::test]
    async fn test_duplicate_check_loads_projects_first() {
        let store = Arc::new(MockStore::new(vec![project(1, "Alpha", vec![])]));
        let svc = service(store.clone());

        let err = svc.create_project("ALPHA").await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateProjectName { .. }));
        assert_eq!(store.calls(), vec!["get_projects"]);
    }

    #[tokio::test]
    async fn test_add_samples_continues_past_failures() {
        let store = Arc::new(MockStore::new(vec![project(1, "Alpha", vec![])]));
        let svc = service(store.clone());
        svc.get_projects().await.unwrap();

        let uploads = svc
            .add_samples(1, &[PathBuf::from("/d/a.fastq"), PathBuf::from("/d/b.fastq")])
            .await;
        assert_eq!(uploads.len(), 2);
        assert!(uploads.iter().all(|u| u.result.is_ok()));
        assert_eq!(svc.snapshot().project(1).unwrap().samples.len(), 2);

        let uploads = svc
            .add_samples(99, &[PathBuf::from("/d/c.fastq"), PathBuf::from("/d/d.fastq")])
            .await;
        assert_eq!(uploads.len(), 2);
        assert!(matches!(
            uploads[0].result,
            Err(ServiceError::Store(StoreError::Logic { .. }))
        ));
        assert_eq!(store.count_calls("add_sample"), 4);
    }

    #[tokio::test]
    async fn test_find_sample_refreshes_on_miss() {
        let store = Arc::new(MockStore::new(vec![project(
            1,
            "Alpha",
            vec![pending_sample(7, 1, "/d/a.fastq")],
        )]));
        let svc = service(store.clone());

        assert_eq!(svc.find_sample(7).await.unwrap().filename, "a.fastq");
        assert_eq!(svc.find_sample(7).await.unwrap().id, 7);
        assert_eq!(store.count_calls("get_projects"), 1);

        let err = svc.find_sample(8).await.unwrap_err();
        assert!(matches!(err, ServiceError::UnknownSample { id: 8 }));
        let err = svc.find_project(3).await.unwrap_err();
        assert!(matches!(err, ServiceError::UnknownProject { id: 3 }));
    }

    #[tokio::test]
    async fn test_deletes_update_snapshot() {
        let store = Arc::new(MockStore::new(vec![
            project(1, "Alpha", vec![pending_sample(7, 1, "/d/a.fastq")]),
            project(2, "Beta", vec![]),
        ]));
        let svc = service(store);
        svc.get_projects().await.unwrap();

        assert_eq!(svc.delete_sample(7).await.unwrap(), "Sample 7 deleted");
        assert!(svc.snapshot().find_sample(7).is_none());
        svc.delete_project(2).await.unwrap();
        assert!(svc.snapshot().project(2).is_none());
        assert!(svc.snapshot().project(1).is_some());
    }

    #[tokio::test]
    async fn test_init_issues_store_init() {
        let store = Arc::new(MockStore::new(vec![]));
        let svc = service(store.clone());
        assert!(svc.init().await);
        assert_eq!(store.calls(), vec!["init"]);
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe() {
        let svc = service(Arc::new(MockStore::new(vec![])));
        let all = svc.subscribe_progress();
        let one = svc.subscribe_sample(4);
        assert_eq!(svc.progress().subscriber_count(), 2);
        assert!(svc.unsubscribe_progress(one.id()));
        assert!(!svc.unsubscribe_progress(one.id()));
        assert!(svc.unsubscribe_progress(all.id()));
        assert_eq!(svc.progress().subscriber_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_analyze_sample_updates_snapshot() {
        use crate::test_support::create_test_script;

        let dir = tempfile::tempdir().unwrap();
        let analyzer = create_test_script(
            dir.path(),
            "analyzer.sh",
            "#!/bin/sh\necho 'PROGRESS:40'\necho '{\"total_reads\":12}'\n",
        );
        let store = Arc::new(MockStore::new(vec![project(
            1,
            "Alpha",
            vec![pending_sample(7, 1, "/d/a.fastq")],
        )]));
        let svc = service_with(store, analyzer);
        svc.get_projects().await.unwrap();
        let mut sub = svc.subscribe_sample(7);

        let outcome = svc.analyze_sample("/d/a.fastq", 7).await;
        assert!(outcome.is_success());
        let stored = svc.snapshot().find_sample(7).unwrap();
        assert_eq!(stored.analysis_results, Some(json!({"total_reads": 12})));
        let percents: Vec<u8> = sub.drain().into_iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![40]);
    }

    #[tokio::test]
    async fn test_analyze_sample_missing_analyzer_fails_cleanly() {
        let store = Arc::new(MockStore::new(vec![project(
            1,
            "Alpha",
            vec![pending_sample(7, 1, "/d/a.fastq")],
        )]));
        let svc = service(store.clone());
        let outcome = svc.analyze_sample("/d/a.fastq", 7).await;
        assert_eq!(
            outcome.failure().unwrap().reason(),
            "analyzer could not be started"
        );
        assert_eq!(store.count_calls("update_sample"), 0);
    }
}
