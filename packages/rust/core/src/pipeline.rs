//! Partition runs: crawl, then transform, with every state change recorded
//! in the `partition_runs` ledger.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use legora_crawler::{CrawlInvoker, CrawlOutcome, CrawlOutputSink, TracingSink};
use legora_shared::{AppConfig, LegoraError, Result};
use legora_storage::{BlobStore, Storage};

use crate::partition::{MonthlyPartitions, PartitionKey, PartitionWindow};
use crate::transform::{DocumentTransformer, FileOutcome, TransformReport, TransformSettings};

// ---------------------------------------------------------------------------
// Run state machine
// ---------------------------------------------------------------------------

/// Lifecycle of one partition run.
///
/// ```text
/// Pending → Crawling → CrawlFailed
///                    → Crawled → Transforming → TransformFailed
///                                             → Transformed
/// ```
///
/// A transform-only run goes straight from `Pending` to `Transforming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Crawling,
    CrawlFailed,
    Crawled,
    Transforming,
    TransformFailed,
    Transformed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Crawling => "crawling",
            Self::CrawlFailed => "crawl_failed",
            Self::Crawled => "crawled",
            Self::Transforming => "transforming",
            Self::TransformFailed => "transform_failed",
            Self::Transformed => "transformed",
        }
    }

    /// No transition leaves this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CrawlFailed | Self::TransformFailed | Self::Transformed
        )
    }

    /// Move to `next`, or fail if the lifecycle does not allow it.
    pub fn advance(self, next: RunState) -> Result<RunState> {
        use RunState::*;
        let allowed = matches!(
            (self, next),
            (Pending, Crawling)
                | (Pending, Transforming)
                | (Crawling, CrawlFailed)
                | (Crawling, Crawled)
                | (Crawled, Transforming)
                | (Transforming, TransformFailed)
                | (Transforming, Transformed)
        );
        if allowed {
            Ok(next)
        } else {
            Err(LegoraError::InvalidTransition {
                from: self.as_str().into(),
                to: next.as_str().into(),
            })
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callbacks for a pipeline run.
pub trait ProgressReporter: Send + Sync {
    /// Called when a partition run enters a new state.
    fn state_changed(&self, partition: &PartitionKey, state: RunState);
    /// Called after each attached file is handled.
    fn file_processed(&self, id: &str, outcome: &FileOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn state_changed(&self, _partition: &PartitionKey, _state: RunState) {}
    fn file_processed(&self, _id: &str, _outcome: &FileOutcome) {}
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Tracks one run's state and mirrors each change into `partition_runs`.
struct RunLedger<'a> {
    storage: &'a Storage,
    key: PartitionKey,
    partition: String,
    state: RunState,
    progress: &'a dyn ProgressReporter,
}

impl<'a> RunLedger<'a> {
    async fn begin(
        storage: &'a Storage,
        key: &PartitionKey,
        progress: &'a dyn ProgressReporter,
    ) -> Result<Self> {
        let partition = key.to_string();
        storage
            .start_run(&partition, RunState::Pending.as_str())
            .await?;
        progress.state_changed(key, RunState::Pending);
        Ok(Self {
            storage,
            key: *key,
            partition,
            state: RunState::Pending,
            progress,
        })
    }

    async fn advance(&mut self, next: RunState, detail: Option<&str>) -> Result<()> {
        self.state = self.state.advance(next)?;
        self.storage
            .update_run(&self.partition, next.as_str(), detail, next.is_terminal())
            .await?;
        self.progress.state_changed(&self.key, next);
        Ok(())
    }

    /// Record a failure state. A ledger write error is logged, not returned,
    /// so the caller can surface the original failure.
    async fn fail(&mut self, next: RunState, cause: &LegoraError) {
        if let Err(e) = self.advance(next, Some(&cause.to_string())).await {
            warn!(partition = %self.partition, error = %e, "failed to record run failure");
        }
    }

    /// Stamp `finished_at` on a run that stops in a non-terminal state.
    async fn settle(&self, detail: Option<&str>) -> Result<()> {
        self.storage
            .update_run(&self.partition, self.state.as_str(), detail, true)
            .await
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Result of a full crawl-and-transform partition run.
#[derive(Debug, Clone)]
pub struct PartitionRunSummary {
    pub window: PartitionWindow,
    pub crawl: CrawlOutcome,
    pub report: TransformReport,
    pub elapsed: Duration,
}

/// One partition's result within a backfill.
#[derive(Debug)]
pub struct BackfillEntry {
    pub key: PartitionKey,
    pub outcome: Result<PartitionRunSummary>,
}

/// Orchestrates partition runs against one metadata store and blob store.
pub struct PipelineDriver {
    partitions: MonthlyPartitions,
    invoker: CrawlInvoker,
    storage: Storage,
    blobs: Arc<dyn BlobStore>,
    settings: TransformSettings,
    output: Box<dyn CrawlOutputSink>,
}

impl PipelineDriver {
    /// Build a driver from config. An invalid `content_selector` fails here,
    /// before anything is crawled or recorded.
    pub fn new(config: &AppConfig, storage: Storage, blobs: Arc<dyn BlobStore>) -> Result<Self> {
        Ok(Self {
            partitions: MonthlyPartitions::new(config.partitions.epoch),
            invoker: CrawlInvoker::new(config.crawler.clone()),
            storage,
            blobs,
            settings: TransformSettings::from_config(config)?,
            output: Box::new(TracingSink),
        })
    }

    /// Send crawler output somewhere other than the log.
    pub fn with_output_sink(mut self, sink: Box<dyn CrawlOutputSink>) -> Self {
        self.output = sink;
        self
    }

    pub fn partitions(&self) -> &MonthlyPartitions {
        &self.partitions
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn transformer(&self) -> DocumentTransformer<'_> {
        DocumentTransformer::new(&self.storage, self.blobs.as_ref(), &self.settings)
    }

    /// Crawl the partition's window, then transform it. The transform never
    /// starts unless the crawl succeeded.
    #[instrument(skip_all, fields(partition = %key))]
    pub async fn run_partition(
        &self,
        key: &PartitionKey,
        progress: &dyn ProgressReporter,
    ) -> Result<PartitionRunSummary> {
        let start = Instant::now();
        let window = self.partitions.resolve(key);
        info!(from = %window.from_date, to = %window.to_date, "starting partition run");

        let mut ledger = RunLedger::begin(&self.storage, key, progress).await?;
        let crawl = self.crawl_stage(&window, &mut ledger).await?;

        ledger.advance(RunState::Transforming, None).await?;
        let report = self.transform_stage(key, &mut ledger, progress).await?;

        let summary = PartitionRunSummary {
            window,
            crawl,
            report,
            elapsed: start.elapsed(),
        };
        info!(
            written = summary.report.written(),
            elapsed_ms = summary.elapsed.as_millis(),
            "partition run complete"
        );
        Ok(summary)
    }

    /// Run only the crawl stage.
    #[instrument(skip_all, fields(partition = %key))]
    pub async fn crawl_only(
        &self,
        key: &PartitionKey,
        progress: &dyn ProgressReporter,
    ) -> Result<CrawlOutcome> {
        let window = self.partitions.resolve(key);
        let mut ledger = RunLedger::begin(&self.storage, key, progress).await?;
        let crawl = self.crawl_stage(&window, &mut ledger).await?;
        ledger.settle(Some(&crawl_detail(&crawl))).await?;
        Ok(crawl)
    }

    /// Run only the transform stage over whatever raw records exist.
    #[instrument(skip_all, fields(partition = %key))]
    pub async fn transform_only(
        &self,
        key: &PartitionKey,
        progress: &dyn ProgressReporter,
    ) -> Result<TransformReport> {
        let mut ledger = RunLedger::begin(&self.storage, key, progress).await?;
        ledger.advance(RunState::Transforming, None).await?;
        self.transform_stage(key, &mut ledger, progress).await
    }

    /// Run partitions one after another. A failed partition is logged and
    /// the remaining partitions still run.
    pub async fn backfill(
        &self,
        keys: &[PartitionKey],
        progress: &dyn ProgressReporter,
    ) -> Vec<BackfillEntry> {
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = self.run_partition(key, progress).await;
            if let Err(e) = &outcome {
                error!(partition = %key, error = %e, "partition failed, continuing backfill");
            }
            entries.push(BackfillEntry { key: *key, outcome });
        }
        let failed = entries.iter().filter(|e| e.outcome.is_err()).count();
        info!(partitions = entries.len(), failed, "backfill complete");
        entries
    }

    async fn crawl_stage(
        &self,
        window: &PartitionWindow,
        ledger: &mut RunLedger<'_>,
    ) -> Result<CrawlOutcome> {
        ledger.advance(RunState::Crawling, None).await?;
        match self
            .invoker
            .invoke(&window.crawl_args(), self.output.as_ref())
            .await
        {
            Ok(crawl) => {
                ledger
                    .advance(RunState::Crawled, Some(&crawl_detail(&crawl)))
                    .await?;
                Ok(crawl)
            }
            Err(e) => {
                ledger.fail(RunState::CrawlFailed, &e).await;
                Err(e)
            }
        }
    }

    async fn transform_stage(
        &self,
        key: &PartitionKey,
        ledger: &mut RunLedger<'_>,
        progress: &dyn ProgressReporter,
    ) -> Result<TransformReport> {
        match self.transformer().run_with_progress(key, progress).await {
            Ok(report) => {
                ledger
                    .advance(RunState::Transformed, Some(&report.to_json()))
                    .await?;
                Ok(report)
            }
            Err(e) => {
                ledger.fail(RunState::TransformFailed, &e).await;
                Err(e)
            }
        }
    }
}

fn crawl_detail(crawl: &CrawlOutcome) -> String {
    serde_json::json!({
        "lines": crawl.lines,
        "elapsed_ms": u64::try_from(crawl.duration.as_millis()).unwrap_or(u64::MAX),
    })
    .to_string()
}
