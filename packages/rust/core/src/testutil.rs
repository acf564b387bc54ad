//! Fixtures shared by the transform and pipeline tests.

use std::future::Future;
use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use legora_extract::RegionSelector;
use legora_shared::{AppConfig, LegoraError, RawDecisionRecord, RawFile, Result};
use legora_storage::{BlobStore, Storage};
use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;

use crate::transform::TransformSettings;

pub(crate) const PARTITION: &str = "2025-03";

/// Fresh database in a temp dir; both are removed when the dir drops.
pub(crate) async fn temp_storage() -> (Storage, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let storage = Storage::open(&dir.path().join("legora-core-test.db"))
        .await
        .expect("open test db");
    (storage, dir)
}

/// Blob layout used by every test: short prefixes, tiny batches.
pub(crate) fn settings() -> TransformSettings {
    TransformSettings {
        landing_prefix: "landing".into(),
        output_prefix: "processed".into(),
        content_selector: RegionSelector::parse("div.content").expect("selector"),
        batch_size: 2,
    }
}

/// Config matching [`settings`] whose crawler runs `script` through `sh -c`.
pub(crate) fn config_with_crawler(script: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.blob.landing_prefix = "landing".into();
    config.blob.output_prefix = "processed".into();
    config.transform.batch_size = 2;
    config.crawler.program = "sh".into();
    config.crawler.args = vec!["-c".into(), script.into(), "crawler".into()];
    config.crawler.project_dir = std::env::temp_dir().to_string_lossy().to_string();
    config
}

pub(crate) fn raw(id: &str, files: &[(&str, &str)]) -> RawDecisionRecord {
    RawDecisionRecord {
        id: id.into(),
        partition_date: PARTITION.into(),
        link: format!("https://www.workplacerelations.ie/en/cases/{}", id.trim()),
        date: "14/03/2025".into(),
        ref_no: Some(format!("REF-{}", id.trim())),
        parties: Some("Worker v Employer".into()),
        files: files
            .iter()
            .map(|(path, checksum)| RawFile {
                path: (*path).into(),
                checksum: (*checksum).into(),
            })
            .collect(),
    }
}

/// Blob store whose every operation fails.
#[derive(Debug)]
pub(crate) struct FailingBlobStore;

#[async_trait]
impl BlobStore for FailingBlobStore {
    fn bucket(&self) -> &str {
        "legora"
    }

    async fn copy_object(&self, src_key: &str, _dst_key: &str) -> Result<()> {
        Err(LegoraError::blob(src_key, "connection refused"))
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        Err(LegoraError::blob(key, "connection refused"))
    }

    async fn put_object(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        Err(LegoraError::blob(key, "connection refused"))
    }
}

/// Blob store whose every operation hangs.
#[derive(Debug)]
pub(crate) struct StalledBlobStore;

#[async_trait]
impl BlobStore for StalledBlobStore {
    fn bucket(&self) -> &str {
        "legora"
    }

    async fn copy_object(&self, _src_key: &str, _dst_key: &str) -> Result<()> {
        std::future::pending().await
    }

    async fn get_object(&self, _key: &str) -> Result<Vec<u8>> {
        std::future::pending().await
    }

    async fn put_object(&self, _key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        std::future::pending().await
    }
}

/// In-memory log sink for a scoped fmt subscriber.
#[derive(Clone, Default)]
pub(crate) struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Drive `fut` with every event on this thread captured as plain text.
/// Use from a `current_thread` runtime so the future never leaves the thread.
pub(crate) async fn capture_logs<F: Future>(fut: F) -> (F::Output, String) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    let output = {
        let _guard = tracing::subscriber::set_default(subscriber);
        fut.await
    };
    (output, buffer.contents())
}
