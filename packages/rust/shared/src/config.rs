//! Application configuration for legora.
//!
//! User config lives at `~/.legora/legora.toml`; `--config` points at another
//! file. Missing files resolve to defaults. Secrets never live in the file:
//! blob-store credentials come from the standard AWS environment variables.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{LegoraError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "legora.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".legora";

/// Environment variables the `s3` blob backend needs.
const S3_CREDENTIAL_VARS: [&str; 2] = ["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"];

// ---------------------------------------------------------------------------
// Config structs (matching legora.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub partitions: PartitionsConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub blob: BlobConfig,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub transform: TransformConfig,
}

/// `[partitions]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionsConfig {
    /// First day of the first monthly partition.
    #[serde(default = "default_epoch")]
    pub epoch: NaiveDate,
}

impl Default for PartitionsConfig {
    fn default() -> Self {
        Self {
            epoch: default_epoch(),
        }
    }
}

fn default_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default()
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL metadata database.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "var/legora.db".into()
}

/// Which blob store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    /// Buckets are directories under `root`.
    #[default]
    Fs,
    /// S3-compatible object storage (MinIO, AWS).
    S3,
}

/// `[blob]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    #[serde(default)]
    pub backend: BlobBackend,

    /// Root directory for the `fs` backend.
    #[serde(default = "default_blob_root")]
    pub root: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Key prefix of files landed by the crawler.
    #[serde(default = "default_landing_prefix")]
    pub landing_prefix: String,

    /// Key prefix of canonical artifacts.
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,

    /// Endpoint override for the `s3` backend (e.g. a MinIO URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::default(),
            root: default_blob_root(),
            bucket: default_bucket(),
            landing_prefix: default_landing_prefix(),
            output_prefix: default_output_prefix(),
            endpoint: None,
            region: default_region(),
        }
    }
}

fn default_blob_root() -> String {
    "var/blobs".into()
}
fn default_bucket() -> String {
    "legora".into()
}
fn default_landing_prefix() -> String {
    "workplacerelations/landing_zone/full".into()
}
fn default_output_prefix() -> String {
    "workplacerelations/processed".into()
}
fn default_region() -> String {
    "us-east-1".into()
}

/// `[crawler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Executable that runs the crawler.
    #[serde(default = "default_program")]
    pub program: String,

    /// Leading arguments, before the crawl parameters.
    #[serde(default = "default_program_args")]
    pub args: Vec<String>,

    /// Working directory (the crawler's project root).
    #[serde(default = "default_project_dir")]
    pub project_dir: String,

    /// Log level passed through to the crawler.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_program_args(),
            project_dir: default_project_dir(),
            log_level: default_log_level(),
        }
    }
}

fn default_program() -> String {
    "scrapy".into()
}
fn default_program_args() -> Vec<String> {
    vec!["crawl".into(), "decisions".into()]
}
fn default_project_dir() -> String {
    "crawler".into()
}
fn default_log_level() -> String {
    "INFO".into()
}

/// `[transform]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// CSS selector of the content region kept from HTML decisions.
    #[serde(default = "default_content_selector")]
    pub content_selector: String,

    /// Raw records fetched per cursor batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            content_selector: default_content_selector(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_content_selector() -> String {
    "div.content".into()
}
fn default_batch_size() -> u32 {
    1000
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.legora/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| LegoraError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.legora/legora.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LegoraError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        LegoraError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LegoraError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LegoraError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LegoraError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configs the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.blob.bucket.trim().is_empty() {
        return Err(LegoraError::config("blob.bucket must not be empty"));
    }
    if config.blob.landing_prefix.trim_matches('/') == config.blob.output_prefix.trim_matches('/')
    {
        return Err(LegoraError::config(
            "blob.landing_prefix and blob.output_prefix must differ",
        ));
    }
    if config.transform.batch_size == 0 {
        return Err(LegoraError::config("transform.batch_size must be positive"));
    }
    if config.crawler.program.trim().is_empty() {
        return Err(LegoraError::config("crawler.program must not be empty"));
    }
    Ok(())
}

/// Check that the credentials the configured blob backend needs are present.
pub fn validate_blob_credentials(config: &AppConfig) -> Result<()> {
    if config.blob.backend != BlobBackend::S3 {
        return Ok(());
    }
    for var_name in S3_CREDENTIAL_VARS {
        match std::env::var(var_name) {
            Ok(val) if !val.is_empty() => {}
            _ => {
                return Err(LegoraError::config(format!(
                    "blob credentials not found. Set the {var_name} environment variable."
                )));
            }
        }
    }
    Ok(())
}
