//! Analysis commands: `omniqc analyze`, `analyze-all`.

use anyhow::{Result, bail};
use console::style;
use omniqc::batch::{BatchEvent, BatchOutcome};
use omniqc::job::JobOutcome;
use omniqc::ui::AnalysisUI;
use omniqc_common::SampleId;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::mpsc;

use super::connect;
use crate::Cli;

/// Batch events buffered between the scheduler and the terminal.
const EVENT_BUFFER: usize = 64;

pub async fn cmd_analyze(cli: &Cli, project_dir: &Path, sample_id: SampleId) -> Result<()> {
    let service = connect(cli, project_dir).await?;
    let sample = service.find_sample(sample_id).await?;

    let mut progress = service.subscribe_sample(sample.id);
    let mut ui = AnalysisUI::single();
    ui.start(sample.id, &sample.filename);

    let job = service.analyze_sample(&sample.filepath, sample.id);
    tokio::pin!(job);
    let outcome = loop {
        tokio::select! {
            outcome = &mut job => break outcome,
            Some(event) = progress.recv() => ui.apply(event),
        }
    };
    for event in progress.drain() {
        ui.apply(event);
    }
    service.unsubscribe_progress(progress.id());
    ui.finish(sample.id, &sample.filename, &outcome);

    match outcome {
        JobOutcome::Succeeded(_) => Ok(()),
        JobOutcome::Failed(failure) => {
            bail!("Analysis of sample {} failed: {}", sample.id, failure.reason())
        }
    }
}

pub async fn cmd_analyze_all(cli: &Cli, project_dir: &Path, project_id: i64) -> Result<()> {
    let (tx, mut events) = mpsc::channel(EVENT_BUFFER);
    let service = connect(cli, project_dir).await?.with_batch_events(tx);
    let project = service.find_project(project_id).await?;

    let pending = project.pending_samples();
    if pending.is_empty() {
        println!(
            "No pending samples in {}; nothing to analyze.",
            style(&project.name).bold()
        );
        return Ok(());
    }
    let labels: HashMap<SampleId, String> = pending
        .iter()
        .map(|s| (s.id, s.filename.clone()))
        .collect();

    let mut progress = service.subscribe_progress();
    let mut ui = AnalysisUI::batch(pending.len());

    let batch = service.analyze_all_pending(&project);
    tokio::pin!(batch);
    let outcome = loop {
        tokio::select! {
            outcome = &mut batch => break outcome,
            Some(event) = progress.recv() => ui.apply(event),
            Some(event) = events.recv() => {
                // Progress for a job is published before its Finished event.
                if matches!(event, BatchEvent::Finished { .. }) {
                    for tick in progress.drain() {
                        ui.apply(tick);
                    }
                }
                ui.handle_batch_event(&event, &labels);
            }
        }
    };
    for event in std::iter::from_fn(|| events.try_recv().ok()) {
        for tick in progress.drain() {
            ui.apply(tick);
        }
        ui.handle_batch_event(&event, &labels);
    }
    service.unsubscribe_progress(progress.id());

    match outcome {
        BatchOutcome::NothingPending => {
            println!("No pending samples in {}; nothing to analyze.", project.name);
            Ok(())
        }
        BatchOutcome::Completed(summary) => {
            ui.summary(&summary);
            if summary.failed > 0 {
                bail!("{} of {} samples failed", summary.failed, summary.total);
            }
            if summary.skipped > 0 {
                bail!("Batch cancelled with {} samples not analyzed", summary.skipped);
            }
            Ok(())
        }
    }
}
