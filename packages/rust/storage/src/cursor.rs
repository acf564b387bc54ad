//! Batched, keyset-paginated traversal of a partition's raw decisions.
//!
//! Each batch is a fresh bounded query (`id > last_id ORDER BY id LIMIT n`)
//! whose rows are drained before the batch is handed out, so no statement
//! stays open while the caller does slow per-file I/O. A traversal can run
//! for as long as it needs without hitting an idle timeout, and the
//! cursor's connection never holds a read lock across caller writes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use legora_shared::{RawDecisionRecord, Result};
use libsql::{Connection, params};
use tracing::debug;

use crate::{row_to_raw, storage_err};

/// Cursor over the raw decisions of one partition, ordered by id.
///
/// Release it with [`RawCursor::close`]; dropping an open cursor (e.g. when
/// the owning future is cancelled) releases it as well.
pub struct RawCursor {
    conn: Option<Connection>,
    partition_date: String,
    batch_size: u32,
    last_id: Option<String>,
    buffer: VecDeque<RawDecisionRecord>,
    exhausted: bool,
    fetched: u64,
    /// Open-cursor count of the owning [`crate::Storage`].
    open: Arc<AtomicUsize>,
}

impl RawCursor {
    pub(crate) fn new(
        conn: Connection,
        partition_date: &str,
        batch_size: u32,
        open: Arc<AtomicUsize>,
    ) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self {
            conn: Some(conn),
            partition_date: partition_date.to_string(),
            batch_size: batch_size.max(1),
            last_id: None,
            buffer: VecDeque::new(),
            exhausted: false,
            fetched: 0,
            open,
        }
    }

    /// Next raw decision, or `None` once the partition is exhausted or the
    /// cursor has been closed.
    pub async fn next(&mut self) -> Result<Option<RawDecisionRecord>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_batch().await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Whether the cursor still holds its connection.
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Number of records read from the store so far.
    pub fn fetched(&self) -> u64 {
        self.fetched
    }

    /// Release the cursor's connection. Idempotent.
    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            self.open.fetch_sub(1, Ordering::SeqCst);
            debug!(
                partition = %self.partition_date,
                fetched = self.fetched,
                "raw cursor closed"
            );
        }
        self.buffer.clear();
        self.exhausted = true;
    }

    async fn fetch_batch(&mut self) -> Result<()> {
        let Some(conn) = self.conn.as_ref() else {
            self.exhausted = true;
            return Ok(());
        };

        let mut rows = match &self.last_id {
            None => conn
                .query(
                    "SELECT id, partition_date, link, date, ref_no, parties, files_json
                     FROM decisions_raw WHERE partition_date = ?1
                     ORDER BY id LIMIT ?2",
                    params![self.partition_date.as_str(), self.batch_size],
                )
                .await
                .map_err(storage_err)?,
            Some(last_id) => conn
                .query(
                    "SELECT id, partition_date, link, date, ref_no, parties, files_json
                     FROM decisions_raw WHERE partition_date = ?1 AND id > ?2
                     ORDER BY id LIMIT ?3",
                    params![self.partition_date.as_str(), last_id.as_str(), self.batch_size],
                )
                .await
                .map_err(storage_err)?,
        };

        let mut count: u32 = 0;
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let record = row_to_raw(&row)?;
            self.last_id = Some(record.id.clone());
            self.buffer.push_back(record);
            count += 1;
        }

        self.fetched += u64::from(count);
        if count < self.batch_size {
            self.exhausted = true;
        }
        debug!(partition = %self.partition_date, count, "raw cursor batch");
        Ok(())
    }
}

impl Drop for RawCursor {
    fn drop(&mut self) {
        if self.conn.is_some() {
            debug!(partition = %self.partition_date, "raw cursor released on drop");
            self.close();
        }
    }
}
