//! Terminal progress for pipeline runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use legora_core::{FileOutcome, PartitionKey, ProgressReporter, RunState};

/// Spinner showing the current partition state and file count.
pub(crate) struct CliProgress {
    spinner: ProgressBar,
    files: AtomicU64,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self {
            spinner,
            files: AtomicU64::new(0),
        }
    }

    pub(crate) fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn state_changed(&self, partition: &PartitionKey, state: RunState) {
        if state == RunState::Pending {
            self.files.store(0, Ordering::Relaxed);
        }
        let label = match state {
            RunState::Pending => "starting",
            RunState::Crawling => "crawling",
            RunState::Crawled => "crawl finished",
            RunState::CrawlFailed => "crawl failed",
            RunState::Transforming => "transforming",
            RunState::Transformed => "done",
            RunState::TransformFailed => "transform failed",
        };
        self.spinner.set_message(format!("{partition}: {label}"));
    }

    fn file_processed(&self, id: &str, outcome: &FileOutcome) {
        let n = self.files.fetch_add(1, Ordering::Relaxed) + 1;
        let verb = match outcome {
            FileOutcome::Transformed { .. } => "transformed",
            FileOutcome::Fallback { .. } => "stored original",
            FileOutcome::Skipped { .. } => "skipped",
        };
        self.spinner
            .set_message(format!("Transforming [{n}] {id} ({verb})"));
    }
}
