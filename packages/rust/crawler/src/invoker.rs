//! Crawler subprocess: argument building, live output streaming, exit mapping.
//!
//! Command line: `<program> <args...> -a from_date=YYYY-MM-DD
//! -a to_date=YYYY-MM-DD -a partition_date=<key> -s LOG_LEVEL=<level>`,
//! run from the crawler's project directory with the parent environment.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{error, info, instrument};

use legora_shared::{CrawlerConfig, LegoraError, Result};

/// Log target for forwarded crawler output.
const CRAWLER_LOG_TARGET: &str = "legora::crawler";

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Parameters of one crawl, passed to the crawler as `-a key=value` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlArgs {
    /// First day to crawl (inclusive).
    pub from_date: NaiveDate,
    /// Last day to crawl (inclusive).
    pub to_date: NaiveDate,
    /// Label the crawler stamps on every raw record it writes.
    pub partition_date: String,
}

impl CrawlArgs {
    /// The `key=value` crawl parameters, in a fixed order.
    pub fn pairs(&self) -> [(&'static str, String); 3] {
        [
            ("from_date", self.from_date.format("%Y-%m-%d").to_string()),
            ("to_date", self.to_date.format("%Y-%m-%d").to_string()),
            ("partition_date", self.partition_date.clone()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Output sinks
// ---------------------------------------------------------------------------

/// Which pipe of the crawler a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Receives crawler output as it is produced.
pub trait CrawlOutputSink: Send + Sync {
    /// Called once per non-blank output line, already trimmed.
    fn line(&self, stream: OutputStream, line: &str);
}

/// Forwards crawler output to `tracing` at INFO.
pub struct TracingSink;

impl CrawlOutputSink for TracingSink {
    fn line(&self, stream: OutputStream, line: &str) {
        info!(target: CRAWLER_LOG_TARGET, stream = stream.as_str(), "{line}");
    }
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Summary of a successful crawl.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    /// Non-blank output lines forwarded to the sink.
    pub lines: usize,
    /// Wall-clock duration of the crawler process.
    pub duration: Duration,
}

/// Spawns the external crawler for a window and waits for it.
#[derive(Debug, Clone)]
pub struct CrawlInvoker {
    config: CrawlerConfig,
}

impl CrawlInvoker {
    pub fn new(config: CrawlerConfig) -> Self {
        Self { config }
    }

    /// Arguments passed after the program name.
    pub fn command_args(&self, args: &CrawlArgs) -> Vec<String> {
        let mut argv = self.config.args.clone();
        for (key, value) in args.pairs() {
            argv.push("-a".into());
            argv.push(format!("{key}={value}"));
        }
        argv.push("-s".into());
        argv.push(format!("LOG_LEVEL={}", self.config.log_level));
        argv
    }

    /// Run the crawler to completion, streaming its output into `sink`.
    ///
    /// Returns [`LegoraError::CrawlFailure`] on a non-zero exit (or a
    /// signal). The child is killed if the returned future is dropped.
    #[instrument(skip_all, fields(partition = %args.partition_date))]
    pub async fn invoke(
        &self,
        args: &CrawlArgs,
        sink: &dyn CrawlOutputSink,
    ) -> Result<CrawlOutcome> {
        let start = Instant::now();
        let argv = self.command_args(args);
        let project_dir = PathBuf::from(&self.config.project_dir);

        info!(
            program = %self.config.program,
            args = %argv.join(" "),
            cwd = %project_dir.display(),
            "running crawler"
        );

        let mut child = Command::new(&self.config.program)
            .args(&argv)
            .current_dir(&project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                LegoraError::process(format!(
                    "failed to spawn crawler `{}` in {}: {e}",
                    self.config.program,
                    project_dir.display()
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LegoraError::process("failed to capture crawler stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LegoraError::process("failed to capture crawler stderr"))?;

        let lines = forward_output(stdout, stderr, sink).await?;

        let status = child
            .wait()
            .await
            .map_err(|e| LegoraError::process(format!("failed to wait for crawler: {e}")))?;
        let duration = start.elapsed();

        if !status.success() {
            error!(
                exit_code = ?status.code(),
                duration_ms = duration.as_millis(),
                "crawler failed"
            );
            return Err(LegoraError::CrawlFailure {
                exit_code: status.code(),
            });
        }

        info!(lines, duration_ms = duration.as_millis(), "crawler finished");
        Ok(CrawlOutcome { lines, duration })
    }
}

/// Read both pipes concurrently until each reaches EOF, forwarding every
/// non-blank line as soon as it arrives. Returns the number of lines forwarded.
async fn forward_output<O, E>(stdout: O, stderr: E, sink: &dyn CrawlOutputSink) -> Result<usize>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out = BufReader::new(stdout).split(b'\n');
    let mut err = BufReader::new(stderr).split(b'\n');
    let mut out_open = true;
    let mut err_open = true;
    let mut forwarded = 0;

    while out_open || err_open {
        tokio::select! {
            segment = out.next_segment(), if out_open => {
                out_open = emit(segment, OutputStream::Stdout, sink, &mut forwarded)?;
            }
            segment = err.next_segment(), if err_open => {
                err_open = emit(segment, OutputStream::Stderr, sink, &mut forwarded)?;
            }
        }
    }

    Ok(forwarded)
}

/// Forward one segment; returns whether the stream is still open.
fn emit(
    segment: std::io::Result<Option<Vec<u8>>>,
    stream: OutputStream,
    sink: &dyn CrawlOutputSink,
    forwarded: &mut usize,
) -> Result<bool> {
    match segment {
        Ok(Some(bytes)) => {
            let text = String::from_utf8_lossy(&bytes);
            let line = text.trim();
            if !line.is_empty() {
                sink.line(stream, line);
                *forwarded += 1;
            }
            Ok(true)
        }
        Ok(None) => Ok(false),
        Err(e) => Err(LegoraError::process(format!(
            "failed to read crawler {}: {e}",
            stream.as_str()
        ))),
    }
}
