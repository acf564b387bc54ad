//! Shared types, error model, and configuration for legora.
//!
//! This crate is the foundation depended on by all other legora crates.
//! It provides:
//! - [`LegoraError`] — the unified error type
//! - Domain types ([`RawDecisionRecord`], [`RawFile`], [`TransformedDecisionRecord`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BlobBackend, BlobConfig, CrawlerConfig, DatabaseConfig, PartitionsConfig,
    TransformConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_blob_credentials, validate_config,
};
pub use error::{LegoraError, Result};
pub use types::{RawDecisionRecord, RawFile, TransformedDecisionRecord};
