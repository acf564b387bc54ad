//! Partition scheme, transform stage and pipeline orchestration for legora.
//!
//! - [`partition`]: monthly partition keys and their date windows
//! - [`transform`]: the [`DocumentTransformer`] stage
//! - [`pipeline`]: the [`PipelineDriver`] and its run state machine

pub mod partition;
pub mod pipeline;
pub mod transform;

pub use partition::{MonthlyPartitions, PartitionKey, PartitionWindow};
pub use pipeline::{
    BackfillEntry, PartitionRunSummary, PipelineDriver, ProgressReporter, RunState,
    SilentProgress,
};
pub use transform::{DocumentTransformer, FileOutcome, TransformReport, TransformSettings};

#[cfg(test)]
pub(crate) mod testutil;
