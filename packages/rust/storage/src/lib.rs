//! libSQL metadata store and blob storage for legora.
//!
//! The [`Storage`] struct wraps a libSQL database holding raw crawler
//! output (`decisions_raw`), canonical records (`decisions_transformed`)
//! and the per-partition run ledger (`partition_runs`).
//!
//! **Access rules:**
//! - Pipeline: read-write via [`Storage::open`]
//! - Reporting (`legora status`): read-only via [`Storage::open_readonly`]
//!
//! Blob storage lives in [`blob`] behind the [`BlobStore`] trait.

pub mod blob;
mod cursor;
mod migrations;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use legora_shared::{LegoraError, RawDecisionRecord, RawFile, Result, TransformedDecisionRecord};
use libsql::{Connection, Database, params};

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use cursor::RawCursor;

#[cfg(feature = "s3")]
pub use blob::s3::S3BlobStore;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    conn: Connection,
    readonly: bool,
    open_cursors: Arc<AtomicUsize>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LegoraError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            open_cursors: Arc::default(),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (for reporting).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            open_cursors: Arc::default(),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        LegoraError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(LegoraError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Raw decisions (crawler write path)
    // -----------------------------------------------------------------------

    /// Insert a raw decision as produced by the crawler.
    ///
    /// Fails with [`LegoraError::DuplicateRawRecord`] when a record with the
    /// same `(id, partition_date)` already exists; the stored row is untouched.
    pub async fn insert_raw_decision(&self, raw: &RawDecisionRecord) -> Result<()> {
        self.check_writable()?;
        let files_json = serde_json::to_string(&raw.files)
            .map_err(|e| LegoraError::parse(format!("files of {}: {e}", raw.id)))?;
        let now = Utc::now().to_rfc3339();

        let inserted = self
            .conn
            .execute(
                "INSERT INTO decisions_raw (id, partition_date, link, date, ref_no, parties, files_json, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id, partition_date) DO NOTHING",
                params![
                    raw.id.as_str(),
                    raw.partition_date.as_str(),
                    raw.link.as_str(),
                    raw.date.as_str(),
                    raw.ref_no.as_deref(),
                    raw.parties.as_deref(),
                    files_json.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        if inserted == 0 {
            return Err(LegoraError::DuplicateRawRecord {
                id: raw.id.clone(),
                partition_date: raw.partition_date.clone(),
            });
        }
        Ok(())
    }

    /// Get a raw decision by its key.
    pub async fn get_raw_decision(
        &self,
        id: &str,
        partition_date: &str,
    ) -> Result<Option<RawDecisionRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, partition_date, link, date, ref_no, parties, files_json
                 FROM decisions_raw WHERE id = ?1 AND partition_date = ?2",
                params![id, partition_date],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_raw(&row)?)),
            None => Ok(None),
        }
    }

    /// Count raw decisions in a partition.
    pub async fn count_raw_decisions(&self, partition_date: &str) -> Result<u64> {
        count(
            &self.conn,
            "SELECT COUNT(*) FROM decisions_raw WHERE partition_date = ?1",
            partition_date,
        )
        .await
    }

    /// Open a cursor over every raw decision in a partition.
    ///
    /// The cursor runs on its own connection and reads in batches of
    /// `batch_size`; see [`RawCursor`].
    pub fn raw_cursor(&self, partition_date: &str, batch_size: u32) -> Result<RawCursor> {
        let conn = self.db.connect().map_err(storage_err)?;
        Ok(RawCursor::new(
            conn,
            partition_date,
            batch_size,
            Arc::clone(&self.open_cursors),
        ))
    }

    /// Raw cursors handed out by this store that still hold a connection.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Transformed decisions
    // -----------------------------------------------------------------------

    /// Upsert a transformed decision (insert or overwrite on `id + partition_date`).
    pub async fn upsert_transformed(&self, record: &TransformedDecisionRecord) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO decisions_transformed (id, partition_date, link, date, ref_no, parties, file_path, file_hash, file_ext, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id, partition_date) DO UPDATE SET
                   link = excluded.link,
                   date = excluded.date,
                   ref_no = excluded.ref_no,
                   parties = excluded.parties,
                   file_path = excluded.file_path,
                   file_hash = excluded.file_hash,
                   file_ext = excluded.file_ext,
                   updated_at = excluded.updated_at",
                params![
                    record.id.as_str(),
                    record.partition_date.as_str(),
                    record.link.as_str(),
                    record.date.as_str(),
                    record.ref_no.as_deref(),
                    record.parties.as_deref(),
                    record.file_path.as_str(),
                    record.file_hash.as_str(),
                    record.file_ext.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get a transformed decision by its key.
    pub async fn get_transformed(
        &self,
        id: &str,
        partition_date: &str,
    ) -> Result<Option<TransformedDecisionRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, partition_date, link, date, ref_no, parties, file_path, file_hash, file_ext
                 FROM decisions_transformed WHERE id = ?1 AND partition_date = ?2",
                params![id, partition_date],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_transformed(&row)?)),
            None => Ok(None),
        }
    }

    /// List all transformed decisions of a partition, ordered by id.
    pub async fn list_transformed(
        &self,
        partition_date: &str,
    ) -> Result<Vec<TransformedDecisionRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, partition_date, link, date, ref_no, parties, file_path, file_hash, file_ext
                 FROM decisions_transformed WHERE partition_date = ?1 ORDER BY id",
                params![partition_date],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_transformed(&row)?);
        }
        Ok(results)
    }

    /// Count transformed decisions in a partition.
    pub async fn count_transformed(&self, partition_date: &str) -> Result<u64> {
        count(
            &self.conn,
            "SELECT COUNT(*) FROM decisions_transformed WHERE partition_date = ?1",
            partition_date,
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Partition run ledger
    // -----------------------------------------------------------------------

    /// Start (or restart) the ledger entry of a partition run.
    pub async fn start_run(&self, partition_date: &str, state: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO partition_runs (partition_date, state, started_at, finished_at, detail)
                 VALUES (?1, ?2, ?3, NULL, NULL)
                 ON CONFLICT(partition_date) DO UPDATE SET
                   state = excluded.state,
                   started_at = excluded.started_at,
                   finished_at = NULL,
                   detail = NULL",
                params![partition_date, state, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Record a state change of a partition run.
    ///
    /// Terminal states pass `finished = true` to stamp `finished_at`.
    pub async fn update_run(
        &self,
        partition_date: &str,
        state: &str,
        detail: Option<&str>,
        finished: bool,
    ) -> Result<()> {
        self.check_writable()?;
        let finished_at = finished.then(|| Utc::now().to_rfc3339());
        self.conn
            .execute(
                "UPDATE partition_runs SET state = ?1, detail = ?2, finished_at = ?3
                 WHERE partition_date = ?4",
                params![state, detail, finished_at.as_deref(), partition_date],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get the ledger entry of a partition.
    pub async fn get_run(&self, partition_date: &str) -> Result<Option<PartitionRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT partition_date, state, started_at, finished_at, detail
                 FROM partition_runs WHERE partition_date = ?1",
                params![partition_date],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    /// List all ledger entries, ordered by partition.
    pub async fn list_runs(&self) -> Result<Vec<PartitionRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT partition_date, state, started_at, finished_at, detail
                 FROM partition_runs ORDER BY partition_date",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }
}

/// A row of the partition run ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRun {
    pub partition_date: String,
    /// Last recorded pipeline state.
    pub state: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    /// Failure cause or transform stats.
    pub detail: Option<String>,
}

pub(crate) fn storage_err(e: libsql::Error) -> LegoraError {
    LegoraError::Storage(e.to_string())
}

async fn count(conn: &Connection, sql: &str, partition_date: &str) -> Result<u64> {
    let mut rows = conn
        .query(sql, params![partition_date])
        .await
        .map_err(storage_err)?;

    match rows.next().await.map_err(storage_err)? {
        Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)?.max(0) as u64),
        None => Ok(0),
    }
}

/// Convert a `decisions_raw` row to a [`RawDecisionRecord`].
pub(crate) fn row_to_raw(row: &libsql::Row) -> Result<RawDecisionRecord> {
    let id: String = row.get(0).map_err(storage_err)?;
    let files_json: String = row.get(6).map_err(storage_err)?;
    let files: Vec<RawFile> = serde_json::from_str(&files_json)
        .map_err(|e| LegoraError::parse(format!("files of raw decision {id}: {e}")))?;

    Ok(RawDecisionRecord {
        partition_date: row.get(1).map_err(storage_err)?,
        link: row.get(2).map_err(storage_err)?,
        date: row.get(3).map_err(storage_err)?,
        ref_no: row.get::<String>(4).ok(),
        parties: row.get::<String>(5).ok(),
        files,
        id,
    })
}

/// Convert a `decisions_transformed` row to a [`TransformedDecisionRecord`].
fn row_to_transformed(row: &libsql::Row) -> Result<TransformedDecisionRecord> {
    Ok(TransformedDecisionRecord {
        id: row.get(0).map_err(storage_err)?,
        partition_date: row.get(1).map_err(storage_err)?,
        link: row.get(2).map_err(storage_err)?,
        date: row.get(3).map_err(storage_err)?,
        ref_no: row.get::<String>(4).ok(),
        parties: row.get::<String>(5).ok(),
        file_path: row.get(6).map_err(storage_err)?,
        file_hash: row.get(7).map_err(storage_err)?,
        file_ext: row.get(8).map_err(storage_err)?,
    })
}

fn row_to_run(row: &libsql::Row) -> Result<PartitionRun> {
    Ok(PartitionRun {
        partition_date: row.get(0).map_err(storage_err)?,
        state: row.get(1).map_err(storage_err)?,
        started_at: row.get(2).map_err(storage_err)?,
        finished_at: row.get::<String>(3).ok(),
        detail: row.get::<String>(4).ok(),
    })
}
