//! Sequential analysis of every pending sample in a project.
//!
//! The scheduler owns a single worker slot: at most one analyzer process
//! started by a `BatchScheduler` is alive at any time, even when several
//! batches are requested concurrently. Jobs are queued in project order and
//! each one fully resolves before the next starts. A failed job is recorded
//! and the queue moves on.

use crate::job::{AnalysisJob, JobContext, JobOutcome};
use crate::service::ProjectSnapshot;
use omniqc_common::{Project, ProjectId, Sample, SampleId};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Events emitted while a batch runs.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// A job is about to start.
    Started {
        sample_id: SampleId,
        filename: String,
        /// 1-based position in the batch
        index: usize,
        total: usize,
    },
    /// A job resolved. Listeners clear the sample's progress entry here.
    Finished {
        sample_id: SampleId,
        outcome: JobOutcome,
    },
    /// The project list was re-read after a job.
    ProjectsRefreshed { projects: Vec<Project> },
}

/// Counts for a batch that had work to do.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub project_id: ProjectId,
    /// Pending samples found when the batch started
    pub total: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Not attempted because the batch was cancelled
    pub skipped: usize,
    pub duration: Duration,
    pub outcomes: Vec<(SampleId, JobOutcome)>,
}

impl BatchSummary {
    fn new(project_id: ProjectId, total: usize) -> Self {
        Self {
            project_id,
            total,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            duration: Duration::ZERO,
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, sample_id: SampleId, outcome: JobOutcome) {
        self.attempted += 1;
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push((sample_id, outcome));
    }

    /// Every pending sample was analyzed and stored.
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }
}

/// Result of `analyze_all_pending`.
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// The project had no pending samples; nothing was run.
    NothingPending,
    Completed(BatchSummary),
}

/// Runs analysis jobs one at a time.
pub struct BatchScheduler {
    ctx: JobContext,
    worker: Arc<Semaphore>,
    snapshot: Option<ProjectSnapshot>,
    event_tx: Option<mpsc::Sender<BatchEvent>>,
}

impl BatchScheduler {
    pub fn new(ctx: JobContext) -> Self {
        Self {
            ctx,
            worker: Arc::new(Semaphore::new(1)),
            snapshot: None,
            event_tx: None,
        }
    }

    /// Keep `snapshot` in step with every post-job refresh.
    pub fn with_snapshot(mut self, snapshot: ProjectSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Set the event channel for batch progress.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<BatchEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    async fn emit(&self, event: BatchEvent) {
        if let Some(tx) = &self.event_tx {
            // A departed listener does not stop the batch.
            let _ = tx.send(event).await;
        }
    }

    /// Analyze every sample of `project` that has no results yet.
    pub async fn analyze_all_pending(
        &self,
        project: &Project,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let mut queue: VecDeque<Sample> = project.pending_samples().into_iter().cloned().collect();
        if queue.is_empty() {
            info!(project_id = project.id, "no pending samples");
            return BatchOutcome::NothingPending;
        }

        let total = queue.len();
        let start = Instant::now();
        let mut summary = BatchSummary::new(project.id, total);
        info!(project_id = project.id, total, "batch analysis started");

        let mut index = 0;
        while let Some(sample) = queue.pop_front() {
            if cancel.is_cancelled() {
                summary.skipped = queue.len() + 1;
                warn!(skipped = summary.skipped, "batch cancelled");
                break;
            }
            index += 1;
            let outcome = self.run_one(&sample, index, total, cancel).await;
            summary.record(sample.id, outcome);
            self.refresh().await;
        }

        summary.duration = start.elapsed();
        info!(
            project_id = project.id,
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            elapsed_ms = summary.duration.as_millis() as u64,
            "batch analysis finished"
        );
        BatchOutcome::Completed(summary)
    }

    async fn run_one(
        &self,
        sample: &Sample,
        index: usize,
        total: usize,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        // The semaphore is never closed, so acquisition only waits.
        let _slot = self.worker.acquire().await.ok();
        self.emit(BatchEvent::Started {
            sample_id: sample.id,
            filename: sample.filename.clone(),
            index,
            total,
        })
        .await;

        let outcome = AnalysisJob::for_sample(sample).run(&self.ctx, cancel).await;

        self.emit(BatchEvent::Finished {
            sample_id: sample.id,
            outcome: outcome.clone(),
        })
        .await;
        outcome
    }

    async fn refresh(&self) {
        match self.ctx.store.get_projects().await {
            Ok(projects) => {
                if let Some(snapshot) = &self.snapshot {
                    snapshot.replace(projects.clone());
                }
                self.emit(BatchEvent::ProjectsRefreshed { projects }).await;
            }
            Err(e) => warn!(error = %e, "project refresh after job failed"),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::{CommandSpec, Framing, ProcessInvoker};
    use crate::progress::ProgressChannel;
    use crate::protocol::FragmentPolicy;
    use crate::test_support::{MockStore, create_test_script, pending_sample, project};
    use serde_json::json;
    use tempfile::tempdir;

    /// Fails for any path containing "bad".
    const PICKY_ANALYZER: &str = "#!/bin/sh\ncase \"$1\" in *bad*) echo 'truncated record' >&2; exit 1;; esac\necho 'PROGRESS:50'\necho '{\"total_reads\":5}'\n";

    fn scheduler(dir: &std::path::Path, body: &str, store: Arc<MockStore>) -> BatchScheduler {
        let script = create_test_script(dir, "analyzer.sh", body);
        BatchScheduler::new(JobContext {
            analyzer: ProcessInvoker::new(
                CommandSpec::new(script),
                Framing::Lines(FragmentPolicy::Drop),
            ),
            store,
            progress: ProgressChannel::new(),
        })
    }

    fn three_pending() -> Project {
        project(
            1,
            "Alpha",
            vec![
                pending_sample(1, 1, "/data/one.fastq"),
                pending_sample(2, 1, "/data/bad.fastq"),
                pending_sample(3, 1, "/data/three.fastq"),
            ],
        )
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_batch() {
        let dir = tempdir().unwrap();
        let alpha = three_pending();
        let store = Arc::new(MockStore::new(vec![alpha.clone()]));
        let scheduler = scheduler(dir.path(), PICKY_ANALYZER, store.clone());

        let outcome = scheduler
            .analyze_all_pending(&alpha, &CancellationToken::new())
            .await;

        let BatchOutcome::Completed(summary) = outcome else {
            panic!("Expected a completed batch");
        };
        assert_eq!(summary.total, 3);
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_succeeded());
        assert!(!summary.outcomes[1].1.is_success());
        assert!(summary.outcomes[2].1.is_success());
        assert_eq!(store.count_calls("update_sample"), 2);
        assert_eq!(store.count_calls("get_projects"), 3);
    }

    #[tokio::test]
    async fn test_nothing_pending_is_distinct() {
        let dir = tempdir().unwrap();
        let mut done = pending_sample(1, 1, "/data/one.fastq");
        done.analysis_results = Some(json!({"total_reads": 1}));
        let alpha = project(1, "Alpha", vec![done]);
        let store = Arc::new(MockStore::new(vec![alpha.clone()]));
        let scheduler = scheduler(dir.path(), PICKY_ANALYZER, store.clone());

        let outcome = scheduler
            .analyze_all_pending(&alpha, &CancellationToken::new())
            .await;

        assert!(matches!(outcome, BatchOutcome::NothingPending));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_only_pending_samples_are_queued() {
        let dir = tempdir().unwrap();
        let mut alpha = three_pending();
        alpha.samples[1].analysis_results = Some(json!({"total_reads": 9}));
        let store = Arc::new(MockStore::new(vec![alpha.clone()]));
        let scheduler = scheduler(dir.path(), PICKY_ANALYZER, store.clone());

        let BatchOutcome::Completed(summary) = scheduler
            .analyze_all_pending(&alpha, &CancellationToken::new())
            .await
        else {
            panic!("Expected a completed batch");
        };
        assert_eq!(summary.total, 2);
        assert!(summary.all_succeeded());
        let ids: Vec<SampleId> = summary.outcomes.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_events_follow_each_job() {
        let dir = tempdir().unwrap();
        let alpha = three_pending();
        let store = Arc::new(MockStore::new(vec![alpha.clone()]));
        let (tx, mut rx) = mpsc::channel(64);
        let scheduler = scheduler(dir.path(), PICKY_ANALYZER, store).with_event_channel(tx);

        scheduler
            .analyze_all_pending(&alpha, &CancellationToken::new())
            .await;
        drop(scheduler);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(match event {
                BatchEvent::Started { sample_id, index, total, .. } => {
                    assert_eq!(total, 3);
                    format!("start:{}:{}", sample_id, index)
                }
                BatchEvent::Finished { sample_id, outcome } => {
                    format!("done:{}:{}", sample_id, outcome.is_success())
                }
                BatchEvent::ProjectsRefreshed { .. } => "refresh".to_string(),
            });
        }
        assert_eq!(
            kinds,
            vec![
                "start:1:1",
                "done:1:true",
                "refresh",
                "start:2:2",
                "done:2:false",
                "refresh",
                "start:3:3",
                "done:3:true",
                "refresh",
            ]
        );
    }

    #[tokio::test]
    async fn test_refresh_updates_snapshot() {
        let dir = tempdir().unwrap();
        let alpha = three_pending();
        let store = Arc::new(MockStore::new(vec![alpha.clone()]));
        let snapshot = ProjectSnapshot::default();
        let scheduler =
            scheduler(dir.path(), PICKY_ANALYZER, store).with_snapshot(snapshot.clone());

        scheduler
            .analyze_all_pending(&alpha, &CancellationToken::new())
            .await;

        let refreshed = snapshot.project(1).unwrap();
        assert_eq!(refreshed.pending_samples().len(), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_analyzer_across_batches() {
        let dir = tempdir().unwrap();
        let lock = dir.path().join("running");
        // Exits 3 if another instance is alive.
        let body = format!(
            "#!/bin/sh\nif [ -e '{lock}' ]; then exit 3; fi\ntouch '{lock}'\nsleep 0.05\nrm '{lock}'\necho '{{}}'\n",
            lock = lock.display()
        );
        let alpha = three_pending();
        let mut beta = project(2, "Beta", vec![pending_sample(4, 2, "/data/four.fastq")]);
        beta.samples.push(pending_sample(5, 2, "/data/five.fastq"));
        let store = Arc::new(MockStore::new(vec![alpha.clone(), beta.clone()]));
        let scheduler = scheduler(dir.path(), &body, store);
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(
            scheduler.analyze_all_pending(&alpha, &cancel),
            scheduler.analyze_all_pending(&beta, &cancel),
        );

        for outcome in [a, b] {
            let BatchOutcome::Completed(summary) = outcome else {
                panic!("Expected a completed batch");
            };
            assert!(summary.all_succeeded(), "overlapping analyzers: {:?}", summary);
        }
    }

    #[tokio::test]
    async fn test_cancelled_batch_skips_remaining() {
        let dir = tempdir().unwrap();
        let alpha = three_pending();
        let store = Arc::new(MockStore::new(vec![alpha.clone()]));
        let scheduler = scheduler(dir.path(), PICKY_ANALYZER, store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let BatchOutcome::Completed(summary) = scheduler.analyze_all_pending(&alpha, &cancel).await
        else {
            panic!("Expected a completed batch");
        };
        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.skipped, 3);
        assert!(store.calls().is_empty());
    }
}
