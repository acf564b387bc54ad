//! Transform stage: raw decisions of a partition → canonical artifacts and
//! transformed records.
//!
//! For each raw record and each attached file, in listed order:
//! classify by extension, derive the canonical bytes, fingerprint them,
//! write the artifact under `{output_prefix}/{id}.{ext}` and upsert the
//! transformed record keyed by `(id, partition_date)`.
//!
//! Re-running a partition rewrites the same keys with the same values.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use legora_extract::{Handling, RegionSelector, classify, content_type, normalize_ext, sha256_hex};
use legora_shared::{
    AppConfig, RawDecisionRecord, RawFile, Result, TransformedDecisionRecord,
};
use legora_storage::{BlobStore, RawCursor, Storage};

use crate::partition::PartitionKey;
use crate::pipeline::{ProgressReporter, SilentProgress};

const HTML_CONTENT_TYPE: &str = "text/html";

/// Blob layout and extraction settings for the transform stage.
#[derive(Debug, Clone)]
pub struct TransformSettings {
    pub landing_prefix: String,
    pub output_prefix: String,
    pub content_selector: RegionSelector,
    pub batch_size: u32,
}

impl TransformSettings {
    /// Settings from the `[blob]` and `[transform]` sections. Fails with a
    /// `Parse` error when `content_selector` does not compile.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            landing_prefix: config.blob.landing_prefix.clone(),
            output_prefix: config.blob.output_prefix.clone(),
            content_selector: RegionSelector::parse(&config.transform.content_selector)?,
            batch_size: config.transform.batch_size,
        })
    }

    /// Where the crawler landed `path`: the landing prefix plus its file name.
    pub fn landing_key(&self, path: &str) -> String {
        let file_name = Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.trim_matches('/').to_string());
        join_key(&self.landing_prefix, &file_name)
    }

    /// Canonical artifact key of a decision.
    pub fn canonical_key(&self, id: &str, ext: &str) -> String {
        join_key(&self.output_prefix, &format!("{id}.{ext}"))
    }
}

fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// What happened to a single attached file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Canonical artifact written and record upserted.
    Transformed { key: String, hash: String },
    /// HTML without a usable content region: the original bytes were stored
    /// under the crawl checksum.
    Fallback { key: String, hash: String },
    /// Unsupported file type; nothing written.
    Skipped { ext: String },
}

/// Totals of one transform run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformReport {
    pub records: u64,
    pub transformed: u64,
    pub fallbacks: u64,
    pub skipped: u64,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl TransformReport {
    fn count(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Transformed { .. } => self.transformed += 1,
            FileOutcome::Fallback { .. } => self.fallbacks += 1,
            FileOutcome::Skipped { .. } => self.skipped += 1,
        }
    }

    /// Records written (transformed or fallback).
    pub fn written(&self) -> u64 {
        self.transformed + self.fallbacks
    }

    /// JSON form stored in the run ledger.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Runs the transform stage against a metadata store and a blob store.
pub struct DocumentTransformer<'a> {
    storage: &'a Storage,
    blobs: &'a dyn BlobStore,
    settings: &'a TransformSettings,
}

impl<'a> DocumentTransformer<'a> {
    pub fn new(
        storage: &'a Storage,
        blobs: &'a dyn BlobStore,
        settings: &'a TransformSettings,
    ) -> Self {
        Self {
            storage,
            blobs,
            settings,
        }
    }

    /// Transform every raw record of `key`.
    pub async fn run(&self, key: &PartitionKey) -> Result<TransformReport> {
        self.run_with_progress(key, &SilentProgress).await
    }

    /// Transform every raw record of `key`, reporting each file to `progress`.
    ///
    /// Store failures abort the run; the cursor is released either way.
    #[instrument(skip_all, fields(partition = %key))]
    pub async fn run_with_progress(
        &self,
        key: &PartitionKey,
        progress: &dyn ProgressReporter,
    ) -> Result<TransformReport> {
        let start = Instant::now();
        let partition = key.to_string();
        info!(bucket = self.blobs.bucket(), "starting transform");

        let mut cursor = self
            .storage
            .raw_cursor(&partition, self.settings.batch_size)?;
        let result = self.drain(&mut cursor, progress).await;
        cursor.close();

        let mut report = result?;
        report.elapsed = start.elapsed();
        info!(
            records = report.records,
            transformed = report.transformed,
            fallbacks = report.fallbacks,
            skipped = report.skipped,
            elapsed_ms = report.elapsed.as_millis(),
            "transform complete"
        );
        Ok(report)
    }

    async fn drain(
        &self,
        cursor: &mut RawCursor,
        progress: &dyn ProgressReporter,
    ) -> Result<TransformReport> {
        let mut report = TransformReport::default();
        while let Some(raw) = cursor.next().await? {
            report.records += 1;
            let id = raw.id.trim();
            for file in &raw.files {
                let outcome = self.transform_file(&raw, id, file).await?;
                progress.file_processed(id, &outcome);
                report.count(&outcome);
            }
        }
        Ok(report)
    }

    /// Transform one attached file of `raw` and upsert its record.
    pub async fn transform_file(
        &self,
        raw: &RawDecisionRecord,
        id: &str,
        file: &RawFile,
    ) -> Result<FileOutcome> {
        let ext = normalize_ext(&file.path);
        let landing_key = self.settings.landing_key(&file.path);
        let canonical_key = self.settings.canonical_key(id, &ext);

        let (hash, fallback) = match classify(&ext) {
            Handling::Reject => {
                warn!(id, ext = %ext, path = %file.path, "unsupported file type, skipping");
                return Ok(FileOutcome::Skipped { ext });
            }
            Handling::PassThrough => {
                self.blobs.copy_object(&landing_key, &canonical_key).await?;
                (file.checksum.clone(), false)
            }
            Handling::ExtractAndHash => {
                let content_type = content_type(&ext).unwrap_or(HTML_CONTENT_TYPE);
                self.extract_and_store(id, file, &landing_key, &canonical_key, content_type)
                    .await?
            }
        };

        let record = TransformedDecisionRecord::from_raw(
            raw,
            id,
            canonical_key.clone(),
            hash.clone(),
            ext,
        );
        self.storage.upsert_transformed(&record).await?;
        debug!(id, key = %canonical_key, hash = %hash, fallback, "file transformed");

        Ok(if fallback {
            FileOutcome::Fallback {
                key: canonical_key,
                hash,
            }
        } else {
            FileOutcome::Transformed {
                key: canonical_key,
                hash,
            }
        })
    }

    /// Store the content region of an HTML file, or the whole file when there
    /// is none. Returns the fingerprint and whether the fallback was taken.
    async fn extract_and_store(
        &self,
        id: &str,
        file: &RawFile,
        landing_key: &str,
        canonical_key: &str,
        content_type: &str,
    ) -> Result<(String, bool)> {
        let original = self.blobs.get_object(landing_key).await?;
        match self.content_region(id, landing_key, &original) {
            Some(region) => {
                let hash = sha256_hex(region.as_bytes());
                self.blobs
                    .put_object(canonical_key, region.into_bytes(), content_type)
                    .await?;
                Ok((hash, false))
            }
            None => {
                // Stored bytes are the landed bytes, so the crawl checksum still applies.
                self.blobs
                    .put_object(canonical_key, original, content_type)
                    .await?;
                Ok((file.checksum.clone(), true))
            }
        }
    }

    /// The configured content region of an HTML document, or `None` (with a
    /// warning) when the bytes are not UTF-8 or the region is missing.
    fn content_region(&self, id: &str, key: &str, bytes: &[u8]) -> Option<String> {
        let Ok(html) = std::str::from_utf8(bytes) else {
            warn!(id, key, "HTML is not valid UTF-8, storing original");
            return None;
        };
        let region = self.settings.content_selector.extract(html);
        if region.is_none() {
            warn!(
                id,
                key,
                selector = self.settings.content_selector.as_str(),
                "content region not found, storing original"
            );
        }
        region
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        FailingBlobStore, PARTITION, StalledBlobStore, capture_logs, raw, settings, temp_storage,
    };
    use legora_shared::LegoraError;
    use legora_storage::MemoryBlobStore;

    const DECISION_HTML: &str = r#"<html><head><title>ADJ-00054321</title></head>
<body><nav>menu</nav><div class="content"><h1>Decision</h1><p>Upheld.</p></div></body></html>"#;

    fn key() -> PartitionKey {
        PARTITION.parse().unwrap()
    }

    #[test]
    fn settings_compile_configured_selector() {
        let mut config = AppConfig::default();
        config.transform.content_selector = "article.body".into();
        let settings = TransformSettings::from_config(&config).unwrap();
        assert_eq!(settings.content_selector.as_str(), "article.body");

        config.transform.content_selector = "div[".into();
        let err = TransformSettings::from_config(&config).unwrap_err();
        assert!(matches!(err, LegoraError::Parse { .. }));
    }

    #[test]
    fn key_layout() {
        let s = settings();
        assert_eq!(s.landing_key("full/2025/ADJ-1.pdf"), "landing/ADJ-1.pdf");
        assert_eq!(s.landing_key("ADJ-1.pdf"), "landing/ADJ-1.pdf");
        assert_eq!(s.canonical_key("ADJ-1", "html"), "processed/ADJ-1.html");

        let trailing = TransformSettings {
            output_prefix: "processed/".into(),
            ..settings()
        };
        assert_eq!(trailing.canonical_key("ADJ-1", "pdf"), "processed/ADJ-1.pdf");
    }

    #[tokio::test]
    async fn pdf_passes_through_with_crawl_checksum() {
        let (storage, _dir) = temp_storage().await;
        let blobs = MemoryBlobStore::new("legora");
        let settings = settings();
        blobs.insert("landing/ADJ-00012345.pdf", b"%PDF-1.7 decision".to_vec());
        storage
            .insert_raw_decision(&raw("ADJ-00012345", &[("landing/ADJ-00012345.pdf", "abc123")]))
            .await
            .unwrap();

        let report = DocumentTransformer::new(&storage, &blobs, &settings)
            .run(&key())
            .await
            .unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.transformed, 1);

        let records = storage.list_transformed(PARTITION).await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, "ADJ-00012345");
        assert_eq!(record.file_path, "processed/ADJ-00012345.pdf");
        assert_eq!(record.file_hash, "abc123");
        assert_eq!(record.file_ext, "pdf");
        assert_eq!(record.ref_no.as_deref(), Some("REF-ADJ-00012345"));

        let stored = blobs.object("processed/ADJ-00012345.pdf").expect("artifact");
        assert_eq!(stored.bytes, b"%PDF-1.7 decision");
    }

    #[tokio::test]
    async fn html_region_is_extracted_and_rehashes() {
        let (storage, _dir) = temp_storage().await;
        let blobs = MemoryBlobStore::new("legora");
        let settings = settings();
        blobs.insert("landing/ADJ-00054321.html", DECISION_HTML);
        storage
            .insert_raw_decision(&raw("ADJ-00054321", &[("landing/ADJ-00054321.html", "crawlhash")]))
            .await
            .unwrap();

        let report = DocumentTransformer::new(&storage, &blobs, &settings)
            .run(&key())
            .await
            .unwrap();
        assert_eq!(report.transformed, 1);
        assert_eq!(report.fallbacks, 0);

        let stored = blobs.object("processed/ADJ-00054321.html").expect("artifact");
        assert_eq!(stored.content_type.as_deref(), Some("text/html"));
        let body = String::from_utf8(stored.bytes.clone()).unwrap();
        assert!(body.starts_with("<div class=\"content\">"));
        assert!(!body.contains("menu"));

        let record = storage
            .get_transformed("ADJ-00054321", PARTITION)
            .await
            .unwrap()
            .expect("record");
        assert_ne!(record.file_hash, "crawlhash");
        assert_eq!(record.file_hash, sha256_hex(&stored.bytes));
    }

    #[tokio::test]
    async fn html_without_region_falls_back_to_original() {
        let (storage, _dir) = temp_storage().await;
        let blobs = MemoryBlobStore::new("legora");
        let settings = settings();
        let page = "<html><body><p>No content div here</p></body></html>";
        blobs.insert("landing/ADJ-2.html", page);
        storage
            .insert_raw_decision(&raw("ADJ-2", &[("landing/ADJ-2.html", "orig-sum")]))
            .await
            .unwrap();

        let transformer = DocumentTransformer::new(&storage, &blobs, &settings);
        let report = transformer.run(&key()).await.unwrap();
        assert_eq!(storage.open_cursors(), 0);
        assert_eq!(report.fallbacks, 1);
        assert_eq!(report.transformed, 0);
        assert_eq!(report.written(), 1);

        let stored = blobs.object("processed/ADJ-2.html").expect("artifact");
        assert_eq!(stored.bytes, page.as_bytes());
        let record = storage.get_transformed("ADJ-2", PARTITION).await.unwrap().unwrap();
        assert_eq!(record.file_hash, "orig-sum");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fallback_is_logged_at_warn() {
        let (storage, _dir) = temp_storage().await;
        let blobs = MemoryBlobStore::new("legora");
        let settings = settings();
        blobs.insert("landing/ADJ-2.html", "<html><body><p>none</p></body></html>");
        let record = raw("ADJ-2", &[("landing/ADJ-2.html", "orig-sum")]);

        let transformer = DocumentTransformer::new(&storage, &blobs, &settings);
        let (outcome, logs) =
            capture_logs(transformer.transform_file(&record, "ADJ-2", &record.files[0])).await;

        assert!(matches!(outcome.unwrap(), FileOutcome::Fallback { .. }));
        let line = logs
            .lines()
            .find(|line| line.contains("content region not found"))
            .expect("fallback logged");
        assert!(line.contains("WARN"), "{line}");
        assert!(line.contains("ADJ-2"), "{line}");
        assert!(line.contains("div.content"), "{line}");
    }

    #[tokio::test]
    async fn non_utf8_html_falls_back() {
        let (storage, _dir) = temp_storage().await;
        let blobs = MemoryBlobStore::new("legora");
        let settings = settings();
        let bytes = vec![0x3c, 0x70, 0x3e, 0xff, 0xfe, 0x3c];
        blobs.insert("landing/ADJ-3.html", bytes.clone());
        let record = raw("ADJ-3", &[("landing/ADJ-3.html", "sum3")]);

        let outcome = DocumentTransformer::new(&storage, &blobs, &settings)
            .transform_file(&record, "ADJ-3", &record.files[0])
            .await
            .unwrap();
        assert_eq!(
            outcome,
            FileOutcome::Fallback {
                key: "processed/ADJ-3.html".into(),
                hash: "sum3".into()
            }
        );
        assert_eq!(blobs.object("processed/ADJ-3.html").unwrap().bytes, bytes);
    }

    #[tokio::test]
    async fn unsupported_files_are_skipped_and_siblings_processed() {
        let (storage, _dir) = temp_storage().await;
        let blobs = MemoryBlobStore::new("legora");
        let settings = settings();
        blobs.insert("landing/ADJ-4.pdf", b"%PDF".to_vec());
        storage
            .insert_raw_decision(&raw(
                "ADJ-4",
                &[("landing/ADJ-4.docx", "d1"), ("landing/ADJ-4.pdf", "p1")],
            ))
            .await
            .unwrap();
        storage
            .insert_raw_decision(&raw("ADJ-5", &[("landing/ADJ-5.docx", "d2")]))
            .await
            .unwrap();

        let report = DocumentTransformer::new(&storage, &blobs, &settings)
            .run(&key())
            .await
            .unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.transformed, 1);

        assert!(storage.get_transformed("ADJ-5", PARTITION).await.unwrap().is_none());
        let record = storage.get_transformed("ADJ-4", PARTITION).await.unwrap().unwrap();
        assert_eq!(record.file_ext, "pdf");
        assert_eq!(blobs.keys(), vec!["landing/ADJ-4.pdf", "processed/ADJ-4.pdf"]);
    }

    #[tokio::test]
    async fn ids_are_trimmed() {
        let (storage, _dir) = temp_storage().await;
        let blobs = MemoryBlobStore::new("legora");
        let settings = settings();
        blobs.insert("landing/ADJ-6.pdf", b"%PDF".to_vec());
        storage
            .insert_raw_decision(&raw("  ADJ-6 \n", &[("landing/ADJ-6.pdf", "s6")]))
            .await
            .unwrap();

        DocumentTransformer::new(&storage, &blobs, &settings)
            .run(&key())
            .await
            .unwrap();

        let record = storage.get_transformed("ADJ-6", PARTITION).await.unwrap().unwrap();
        assert_eq!(record.file_path, "processed/ADJ-6.pdf");
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let (storage, _dir) = temp_storage().await;
        let blobs = MemoryBlobStore::new("legora");
        let settings = settings();
        // More records than one cursor batch
        for n in 1..=5 {
            let id = format!("ADJ-{n:08}");
            blobs.insert(format!("landing/{id}.html"), DECISION_HTML);
            storage
                .insert_raw_decision(&raw(&id, &[(format!("landing/{id}.html").as_str(), "x")]))
                .await
                .unwrap();
        }

        let transformer = DocumentTransformer::new(&storage, &blobs, &settings);
        let first_report = transformer.run(&key()).await.unwrap();
        let first = storage.list_transformed(PARTITION).await.unwrap();
        let second_report = transformer.run(&key()).await.unwrap();
        let second = storage.list_transformed(PARTITION).await.unwrap();

        assert_eq!(first_report.records, 5);
        assert_eq!(second_report.records, 5);
        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
        assert_eq!(storage.count_transformed(PARTITION).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn last_accepted_file_wins() {
        let (storage, _dir) = temp_storage().await;
        let blobs = MemoryBlobStore::new("legora");
        let settings = settings();
        blobs.insert("landing/ADJ-7.pdf", b"%PDF".to_vec());
        blobs.insert("landing/ADJ-7.html", DECISION_HTML);
        storage
            .insert_raw_decision(&raw(
                "ADJ-7",
                &[("landing/ADJ-7.pdf", "pdfsum"), ("landing/ADJ-7.html", "htmlsum")],
            ))
            .await
            .unwrap();

        DocumentTransformer::new(&storage, &blobs, &settings)
            .run(&key())
            .await
            .unwrap();

        let records = storage.list_transformed(PARTITION).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_ext, "html");
    }

    #[tokio::test]
    async fn missing_landing_object_aborts() {
        let (storage, _dir) = temp_storage().await;
        let blobs = MemoryBlobStore::new("legora");
        let settings = settings();
        storage
            .insert_raw_decision(&raw("ADJ-8", &[("landing/ADJ-8.pdf", "s8")]))
            .await
            .unwrap();

        let err = DocumentTransformer::new(&storage, &blobs, &settings)
            .run(&key())
            .await
            .unwrap_err();
        assert!(matches!(err, LegoraError::BlobNotFound { .. }));
        assert_eq!(storage.count_transformed(PARTITION).await.unwrap(), 0);
        assert_eq!(storage.open_cursors(), 0);
    }

    #[tokio::test]
    async fn blob_store_failure_aborts() {
        let (storage, _dir) = temp_storage().await;
        let settings = settings();
        storage
            .insert_raw_decision(&raw("ADJ-9", &[("landing/ADJ-9.pdf", "s9")]))
            .await
            .unwrap();

        let err = DocumentTransformer::new(&storage, &FailingBlobStore, &settings)
            .run(&key())
            .await
            .unwrap_err();
        assert!(matches!(err, LegoraError::Blob { .. }));
        assert_eq!(storage.count_transformed(PARTITION).await.unwrap(), 0);
        assert_eq!(storage.open_cursors(), 0);
    }

    #[tokio::test]
    async fn cancelled_run_releases_cursor() {
        let (storage, _dir) = temp_storage().await;
        let settings = settings();
        storage
            .insert_raw_decision(&raw("ADJ-10", &[("landing/ADJ-10.pdf", "s10")]))
            .await
            .unwrap();

        let stalled = StalledBlobStore;
        let transformer = DocumentTransformer::new(&storage, &stalled, &settings);
        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), transformer.run(&key())).await;

        assert!(timed_out.is_err());
        assert_eq!(storage.open_cursors(), 0);
    }

    #[tokio::test]
    async fn empty_partition_reports_nothing() {
        let (storage, _dir) = temp_storage().await;
        let blobs = MemoryBlobStore::new("legora");
        let settings = settings();

        let report = DocumentTransformer::new(&storage, &blobs, &settings)
            .run(&key())
            .await
            .unwrap();
        assert_eq!(report.records, 0);
        assert_eq!(report.written(), 0);
    }

    #[test]
    fn report_json_uses_millis() {
        let report = TransformReport {
            records: 3,
            transformed: 2,
            fallbacks: 1,
            skipped: 0,
            elapsed: Duration::from_millis(1500),
        };
        let json: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(json["elapsed_ms"], 1500);
        assert_eq!(json["fallbacks"], 1);
    }
}
