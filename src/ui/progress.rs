use crate::batch::{BatchEvent, BatchSummary};
use crate::job::JobOutcome;
use crate::progress::ProgressBoard;
use crate::ui::icons::{CHECK, CLOCK, CROSS, PROGRESS, SKIP, SPARKLE, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use omniqc_common::{ProgressEvent, SampleId};
use std::collections::HashMap;
use std::time::Duration;

/// Terminal view of running analyses, rendered via `indicatif`.
///
/// One bar per in-flight sample, plus an overall bar when a batch is
/// running. Percentages pass through a `ProgressBoard`, so repeated values
/// are ignored and a value that goes backwards is reported instead of
/// moving the bar.
pub struct AnalysisUI {
    multi: MultiProgress,
    batch_bar: Option<ProgressBar>,
    bars: HashMap<SampleId, ProgressBar>,
    board: ProgressBoard,
}

impl AnalysisUI {
    /// A view for a single analysis.
    pub fn single() -> Self {
        Self::with_multi(MultiProgress::new(), None)
    }

    /// A view for a batch of `total` samples.
    pub fn batch(total: usize) -> Self {
        let multi = MultiProgress::new();
        let bar_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let bar = multi.add(ProgressBar::new(total as u64));
        bar.set_style(bar_style);
        bar.set_prefix("Samples");
        Self::with_multi(multi, Some(bar))
    }

    /// A view that draws nothing; used when output is not a terminal.
    pub fn hidden() -> Self {
        Self::with_multi(
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            None,
        )
    }

    fn with_multi(multi: MultiProgress, batch_bar: Option<ProgressBar>) -> Self {
        Self {
            multi,
            batch_bar,
            bars: HashMap::new(),
            board: ProgressBoard::new(),
        }
    }

    /// Print above the bars; straight to stdout when nothing is drawn.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() || self.multi.println(msg.as_ref()).is_err() {
            println!("{}", msg.as_ref());
        }
    }

    /// Add a bar for a sample at 0%.
    pub fn start(&mut self, sample_id: SampleId, label: &str) {
        let bar_style = ProgressStyle::default_bar()
            .template("  {prefix} [{bar:30.green/white}] {pos:>3}% {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("=> ");
        let bar = self.multi.add(ProgressBar::new(100));
        bar.set_style(bar_style);
        bar.set_prefix(format!("{}", PROGRESS));
        bar.set_message(label.to_string());
        self.board.start(sample_id);
        self.bars.insert(sample_id, bar);
        if let Some(batch) = &self.batch_bar {
            batch.set_message(format!("{}", style(label).yellow()));
        }
    }

    /// Apply one progress event. Events for samples without a bar are ignored.
    pub fn apply(&mut self, event: ProgressEvent) {
        let Some(bar) = self.bars.get(&event.sample_id) else {
            return;
        };
        match self.board.apply(event) {
            Ok(true) => bar.set_position(event.percent as u64),
            Ok(false) => {}
            Err(violation) => {
                let line = format!("    {} {}", WARN, style(violation.to_string()).yellow());
                self.print_line(line);
            }
        }
    }

    /// Latest percent shown for a sample.
    pub fn percent(&self, sample_id: SampleId) -> Option<u8> {
        self.board.get(sample_id)
    }

    /// Remove a sample's bar and print its outcome line.
    pub fn finish(&mut self, sample_id: SampleId, label: &str, outcome: &JobOutcome) {
        self.board.clear(sample_id);
        if let Some(bar) = self.bars.remove(&sample_id) {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        if let Some(batch) = &self.batch_bar {
            batch.inc(1);
        }

        let line = match outcome {
            JobOutcome::Succeeded(_) => format!("{} {} analyzed", CHECK, style(label).green()),
            JobOutcome::Failed(failure) => {
                let mut line = format!(
                    "{} {}: {}",
                    CROSS,
                    style(label).red().bold(),
                    failure.reason()
                );
                if let Some(detail) = failure.detail() {
                    line.push_str(&format!("\n    {}", style(detail).dim()));
                }
                if let Some(results) = failure.unsaved_results() {
                    line.push_str(&format!(
                        "\n    {} {}",
                        style("unsaved results:").dim(),
                        style(results.to_string()).dim()
                    ));
                }
                line
            }
        };
        self.print_line(line);
    }

    /// Route a batch event to `start`/`finish`.
    pub fn handle_batch_event(&mut self, event: &BatchEvent, labels: &HashMap<SampleId, String>) {
        match event {
            BatchEvent::Started {
                sample_id,
                filename,
                ..
            } => self.start(*sample_id, filename),
            BatchEvent::Finished { sample_id, outcome } => {
                let label = labels
                    .get(sample_id)
                    .cloned()
                    .unwrap_or_else(|| format!("sample {}", sample_id));
                self.finish(*sample_id, &label, outcome);
            }
            BatchEvent::ProjectsRefreshed { .. } => {}
        }
    }

    /// Close the batch bar and print the totals.
    pub fn summary(&self, summary: &BatchSummary) {
        if let Some(batch) = &self.batch_bar {
            batch.finish_and_clear();
        }
        let headline = if summary.all_succeeded() {
            format!("{} {}", SPARKLE, style("All pending samples analyzed").green().bold())
        } else {
            format!("{} {}", WARN, style("Batch finished with failures").yellow().bold())
        };
        self.print_line(format!("\n{}", headline));
        self.print_line(format!(
            "  {} succeeded  {} failed  {} of {} attempted",
            style(summary.succeeded).green(),
            style(summary.failed).red(),
            summary.attempted,
            summary.total
        ));
        if summary.skipped > 0 {
            self.print_line(format!("  {} {} skipped after cancellation", SKIP, summary.skipped));
        }
        self.print_line(format!("  {} {}", CLOCK, format_elapsed(summary.duration)));
    }

    /// Whether any sample bar is still open.
    pub fn is_idle(&self) -> bool {
        self.bars.is_empty() && self.board.is_empty()
    }
}

/// `Xs` below a minute, `Xm Ys` above.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
