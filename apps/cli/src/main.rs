//! legora CLI — partitioned ingestion of Workplace Relations decisions.
//!
//! Crawls a monthly window with the external crawler, then transforms the
//! raw records into canonical artifacts and records.

mod commands;
mod progress;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
