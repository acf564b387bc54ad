//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use legora_core::{
    BackfillEntry, MonthlyPartitions, PartitionKey, PartitionRunSummary, PipelineDriver,
    TransformReport,
};
use legora_shared::{
    AppConfig, BlobBackend, LegoraError, RawDecisionRecord, init_config, load_config,
    load_config_from, validate_blob_credentials,
};
use legora_storage::{BlobStore, FsBlobStore, Storage};
use tracing::{info, warn};

use crate::progress::CliProgress;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// legora — monthly ingestion of tribunal decisions.
#[derive(Parser)]
#[command(
    name = "legora",
    version,
    about = "Crawl and normalize Workplace Relations decisions, one monthly partition at a time.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.legora/legora.toml).
    #[arg(long, global = true, env = "LEGORA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl a partition, then transform it.
    Run {
        /// Partition key (YYYY-MM).
        partition: String,
    },

    /// Run only the crawler for a partition.
    Crawl {
        /// Partition key (YYYY-MM).
        partition: String,
    },

    /// Re-run only the transform stage for a partition.
    Transform {
        /// Partition key (YYYY-MM).
        partition: String,
    },

    /// Run every partition in a range, one after another.
    Backfill {
        /// First partition (defaults to the epoch).
        #[arg(long)]
        from: Option<String>,

        /// Last partition (defaults to the current month).
        #[arg(long)]
        through: Option<String>,
    },

    /// List partitions from the epoch through the current month.
    Partitions,

    /// Show recorded partition runs.
    Status {
        /// Only this partition.
        partition: Option<String>,
    },

    /// Raw record management.
    Raw {
        #[command(subcommand)]
        action: RawAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Raw record subcommands.
#[derive(Subcommand)]
pub(crate) enum RawAction {
    /// Import crawler output from a JSON-lines file.
    Import {
        /// File with one raw decision per line.
        path: PathBuf,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "legora=info",
        1 => "legora=debug",
        _ => "legora=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run { partition } => cmd_run(config_path, &partition).await,
        Command::Crawl { partition } => cmd_crawl(config_path, &partition).await,
        Command::Transform { partition } => cmd_transform(config_path, &partition).await,
        Command::Backfill { from, through } => {
            cmd_backfill(config_path, from.as_deref(), through.as_deref()).await
        }
        Command::Partitions => cmd_partitions(config_path).await,
        Command::Status { partition } => cmd_status(config_path, partition.as_deref()).await,
        Command::Raw { action } => match action {
            RawAction::Import { path } => cmd_raw_import(config_path, &path).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

async fn open_blob_store(config: &AppConfig) -> Result<Arc<dyn BlobStore>> {
    validate_blob_credentials(config)?;
    match config.blob.backend {
        BlobBackend::Fs => Ok(Arc::new(FsBlobStore::new(
            &config.blob.root,
            &config.blob.bucket,
        ))),
        #[cfg(feature = "s3")]
        BlobBackend::S3 => Ok(Arc::new(
            legora_storage::S3BlobStore::from_config(&config.blob).await?,
        )),
        #[cfg(not(feature = "s3"))]
        BlobBackend::S3 => Err(eyre!(
            "blob backend 's3' requires a build with the `s3` feature"
        )),
    }
}

async fn build_driver(config: &AppConfig) -> Result<PipelineDriver> {
    let storage = Storage::open(Path::new(&config.database.path)).await?;
    let blobs = open_blob_store(config).await?;
    Ok(PipelineDriver::new(config, storage, blobs)?)
}

fn current_month() -> PartitionKey {
    PartitionKey::containing(Utc::now().date_naive())
}

// ---------------------------------------------------------------------------
// Pipeline commands
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, partition: &str) -> Result<()> {
    let config = resolve_config(config_path)?;
    let driver = build_driver(&config).await?;
    let key = driver.partitions().parse_key(partition)?;

    info!(partition = %key, "running partition");
    let reporter = CliProgress::new();
    let result = driver.run_partition(&key, &reporter).await;
    reporter.finish();

    let summary = result?;
    print_summary(&key, &summary);
    Ok(())
}

async fn cmd_crawl(config_path: Option<&Path>, partition: &str) -> Result<()> {
    let config = resolve_config(config_path)?;
    let driver = build_driver(&config).await?;
    let key = driver.partitions().parse_key(partition)?;

    let reporter = CliProgress::new();
    let result = driver.crawl_only(&key, &reporter).await;
    reporter.finish();

    let crawl = result?;
    println!();
    println!("  Crawl finished for {key}");
    println!("  Output lines: {}", crawl.lines);
    println!("  Time:         {:.1}s", crawl.duration.as_secs_f64());
    println!();
    Ok(())
}

async fn cmd_transform(config_path: Option<&Path>, partition: &str) -> Result<()> {
    let config = resolve_config(config_path)?;
    let driver = build_driver(&config).await?;
    let key = driver.partitions().parse_key(partition)?;

    let reporter = CliProgress::new();
    let result = driver.transform_only(&key, &reporter).await;
    reporter.finish();

    let report = result?;
    println!();
    println!("  Transform finished for {key}");
    print_report(&report);
    println!();
    Ok(())
}

async fn cmd_backfill(
    config_path: Option<&Path>,
    from: Option<&str>,
    through: Option<&str>,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let driver = build_driver(&config).await?;
    let partitions = driver.partitions();

    let from = match from {
        Some(s) => partitions.parse_key(s)?,
        None => partitions.epoch(),
    };
    let through = match through {
        Some(s) => partitions.parse_key(s)?,
        None => current_month(),
    };
    let keys = partitions.keys_between(from, through);
    if keys.is_empty() {
        return Err(eyre!("no partitions between {from} and {through}"));
    }

    info!(from = %from, through = %through, partitions = keys.len(), "starting backfill");
    let reporter = CliProgress::new();
    let entries = driver.backfill(&keys, &reporter).await;
    reporter.finish();

    println!();
    for BackfillEntry { key, outcome } in &entries {
        match outcome {
            Ok(summary) => println!(
                "  {key}  ok      {} written, {} skipped",
                summary.report.written(),
                summary.report.skipped
            ),
            Err(e) => println!("  {key}  failed  {e}"),
        }
    }
    println!();

    let failed = entries.iter().filter(|e| e.outcome.is_err()).count();
    if failed > 0 {
        return Err(eyre!("{failed} of {} partitions failed", entries.len()));
    }
    Ok(())
}

fn print_summary(key: &PartitionKey, summary: &PartitionRunSummary) {
    println!();
    println!("  Partition {key} complete");
    println!(
        "  Window:       {} .. {}",
        summary.window.from_date, summary.window.to_date
    );
    println!("  Crawl lines:  {}", summary.crawl.lines);
    print_report(&summary.report);
    println!("  Total time:   {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

fn print_report(report: &TransformReport) {
    println!("  Records:      {}", report.records);
    println!("  Transformed:  {}", report.transformed);
    println!("  Fallbacks:    {}", report.fallbacks);
    println!("  Skipped:      {}", report.skipped);
    println!("  Transform:    {:.1}s", report.elapsed.as_secs_f64());
}

// ---------------------------------------------------------------------------
// Reporting commands
// ---------------------------------------------------------------------------

async fn cmd_partitions(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let partitions = MonthlyPartitions::new(config.partitions.epoch);

    for key in partitions.keys_through(Utc::now().date_naive()) {
        let window = partitions.resolve(&key);
        println!("{key}  {} .. {}", window.from_date, window.to_date);
    }
    Ok(())
}

async fn cmd_status(config_path: Option<&Path>, partition: Option<&str>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let db_path = Path::new(&config.database.path);
    if !db_path.exists() {
        println!("No runs recorded yet ({} does not exist).", db_path.display());
        return Ok(());
    }
    let storage = Storage::open_readonly(db_path).await?;

    let runs = match partition {
        Some(p) => {
            let key = MonthlyPartitions::new(config.partitions.epoch).parse_key(p)?;
            storage.get_run(&key.to_string()).await?.into_iter().collect()
        }
        None => storage.list_runs().await?,
    };

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!(
        "{:<9} {:<17} {:>7} {:>11}  {:<26} detail",
        "partition", "state", "raw", "transformed", "finished"
    );
    for run in runs {
        let raw = storage.count_raw_decisions(&run.partition_date).await?;
        let transformed = storage.count_transformed(&run.partition_date).await?;
        println!(
            "{:<9} {:<17} {:>7} {:>11}  {:<26} {}",
            run.partition_date,
            run.state,
            raw,
            transformed,
            run.finished_at.as_deref().unwrap_or("-"),
            run.detail.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Raw import
// ---------------------------------------------------------------------------

async fn cmd_raw_import(config_path: Option<&Path>, path: &Path) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::open(Path::new(&config.database.path)).await?;
    let content = std::fs::read_to_string(path).map_err(|e| LegoraError::io(path, e))?;

    let mut imported = 0u64;
    let mut duplicates = 0u64;
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let raw: RawDecisionRecord = serde_json::from_str(line).map_err(|e| {
            LegoraError::parse(format!("{}:{}: {e}", path.display(), n + 1))
        })?;

        match storage.insert_raw_decision(&raw).await {
            Ok(()) => imported += 1,
            Err(LegoraError::DuplicateRawRecord { id, partition_date }) => {
                warn!(id = %id, partition = %partition_date, "duplicate raw record, dropping");
                duplicates += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(imported, duplicates, path = %path.display(), "raw import complete");
    println!("Imported {imported} raw decisions ({duplicates} duplicates dropped).");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
