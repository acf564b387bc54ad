//! Error types for legora.
//!
//! Library crates use [`LegoraError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Data-quality issues (a missing content region, an unknown file type) are
//! not errors: the transform stage records them as outcomes and logs a
//! warning. Everything in this enum is fatal to the current partition run.

use std::path::PathBuf;

/// Top-level error type for all legora operations.
#[derive(Debug, thiserror::Error)]
pub enum LegoraError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Invalid partition key (malformed, or outside the partition scheme).
    #[error("invalid partition: {message}")]
    Partition { message: String },

    /// The external crawler exited unsuccessfully.
    ///
    /// `exit_code` is `None` when the process was terminated by a signal.
    #[error("crawler failed with exit code {}", display_exit_code(.exit_code))]
    CrawlFailure { exit_code: Option<i32> },

    /// The external crawler could not be spawned or its output could not be read.
    #[error("process error: {message}")]
    Process { message: String },

    /// Metadata store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Blob store failure for a specific key.
    #[error("blob store error at {key}: {message}")]
    Blob { key: String, message: String },

    /// A blob that was expected to exist is missing.
    #[error("blob not found: {key}")]
    BlobNotFound { key: String },

    /// A raw record with the same key was already ingested.
    #[error("duplicate raw record: {id} (partition {partition_date})")]
    DuplicateRawRecord { id: String, partition_date: String },

    /// A partition run was asked to move between incompatible states.
    #[error("invalid run state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Malformed input (JSON lines, selectors, stored documents).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LegoraError>;

fn display_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".into(),
    }
}

impl LegoraError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a partition error from any displayable message.
    pub fn partition(msg: impl Into<String>) -> Self {
        Self::Partition {
            message: msg.into(),
        }
    }

    /// Create a process error from any displayable message.
    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a blob store error for `key`.
    pub fn blob(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Blob {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
