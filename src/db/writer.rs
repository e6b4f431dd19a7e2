//! db/writer.rs
//!
//! Size/time-triggered batch upserter, coordinated across instances.
//!
//! Protocol per flush:
//! - copy + clear the queue under the mutex (never hold it across I/O)
//! - take the cluster-wide flush lock; on contention, give the records back
//! - upsert with bounded retries and exponential backoff, extending the lock
//!   after the second attempt
//! - on permanent failure, give the records back and count the batch as failed
//!
//! Re-delivered records are safe either way: the upsert is keyed on `id`.

use crate::db::config::WriterConfig;
use crate::db::metrics::DbMetrics;
use crate::db::rows::TweetRow;
use crate::db::traits::UpsertRow;
use crate::error::{AppError, AppResult};
use crate::model::EnrichedRecord;
use crate::redis::lock::LockManager;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// TTL on the cluster-wide flush lock.
const FLUSH_LOCK_TTL: Duration = Duration::from_secs(30);
/// Extension applied when retries push a flush near the TTL.
const FLUSH_LOCK_EXTENSION: Duration = Duration::from_secs(15);
/// Background loop wakeup period.
const TICK: Duration = Duration::from_secs(1);
/// Rows per INSERT statement; keeps bind counts well under the wire limit
/// when a re-queued backlog piles up.
const CHUNK_ROWS: usize = 500;

#[derive(Debug)]
pub struct BatchWriter {
    pool: PgPool,
    locks: Arc<LockManager>,
    cfg: WriterConfig,
    metrics: DbMetrics,

    queue: Mutex<Vec<EnrichedRecord>>,
    last_flush: Mutex<Instant>,

    total_processed: AtomicU64,
    total_failed: AtomicU64,
    batches_written: AtomicU64,
}

/// Counter snapshot for logs and the status surface.
#[derive(Debug, Clone, Copy)]
pub struct WriterCounters {
    pub total_processed: u64,
    pub total_failed: u64,
    pub batches_written: u64,
}

impl BatchWriter {
    pub fn new(
        pool: PgPool,
        locks: Arc<LockManager>,
        cfg: WriterConfig,
        metrics: DbMetrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            locks,
            cfg,
            metrics,
            queue: Mutex::new(Vec::new()),
            last_flush: Mutex::new(Instant::now()),
            total_processed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            batches_written: AtomicU64::new(0),
        })
    }

    /// Queue a record. A full queue schedules an asynchronous flush; the
    /// mutex is never held while that flush runs.
    pub async fn add(self: &Arc<Self>, record: EnrichedRecord) {
        let queue_full = {
            let mut queue = self.queue.lock().await;
            queue.push(record);
            self.metrics.set_queue_depth(queue.len() as i64);
            queue.len() >= self.cfg.batch_size
        };

        if queue_full {
            debug!(batch_size = self.cfg.batch_size, "queue full, scheduling flush");
            let writer = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = writer.flush().await {
                    error!(error = %e, "scheduled flush failed");
                }
            });
        }
    }

    /// Background loop: wake every second, flush on size or wall-time
    /// triggers. On cancellation, one final synchronous flush.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            batch_size = self.cfg.batch_size,
            max_wait_seconds = self.cfg.max_wait_seconds,
            "batch writer started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("performing final flush before shutdown");
                    if let Err(e) = self.flush().await {
                        error!(error = %e, "final flush failed");
                    }
                    let counters = self.counters();
                    info!(
                        total_processed = counters.total_processed,
                        total_failed = counters.total_failed,
                        batches_written = counters.batches_written,
                        "batch writer stopped"
                    );
                    return;
                }
                _ = sleep(TICK) => {}
            }

            let should_flush = {
                let queue = self.queue.lock().await;
                let waited = self.last_flush.lock().await.elapsed();
                queue.len() >= self.cfg.batch_size
                    || (!queue.is_empty()
                        && waited >= Duration::from_secs(self.cfg.max_wait_seconds))
            };

            if should_flush {
                if let Err(e) = self.flush().await {
                    error!(error = %e, "periodic flush failed");
                }
            }
        }
    }

    /// Flush the queue under the cluster-wide lock.
    ///
    /// Ok(true): wrote (or nothing to write). Ok(false): contention or
    /// permanent failure; records went back to the queue head and the next
    /// tick retries.
    pub async fn flush(&self) -> AppResult<bool> {
        let batch = {
            let mut queue = self.queue.lock().await;
            if queue.is_empty() {
                return Ok(true);
            }
            let batch = std::mem::take(&mut *queue);
            self.metrics.set_queue_depth(0);
            batch
        };
        let batch_len = batch.len();

        let lock_name = format!("batch_writer_flush:{}", self.cfg.batch_size);
        let Some(mut lock) = self.locks.acquire_lock(&lock_name, FLUSH_LOCK_TTL).await else {
            warn!(lock_name = %lock_name, "flush lock contended, re-queueing batch");
            self.metrics.inc_lock_contention();
            self.metrics.inc_batch_failed();
            self.total_failed.fetch_add(batch_len as u64, Ordering::Relaxed);
            self.requeue_front(batch).await;
            return Ok(false);
        };

        let flush_started = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.write_batch(&batch).await {
                Ok(()) => {
                    self.total_processed
                        .fetch_add(batch_len as u64, Ordering::Relaxed);
                    self.batches_written.fetch_add(1, Ordering::Relaxed);
                    *self.last_flush.lock().await = Instant::now();

                    self.metrics.inc_batch_written();
                    self.metrics.add_rows_upserted(batch_len as u64);
                    self.metrics
                        .observe_flush_seconds(flush_started.elapsed().as_secs_f64());

                    info!(
                        size = batch_len,
                        total_processed = self.total_processed.load(Ordering::Relaxed),
                        batches_written = self.batches_written.load(Ordering::Relaxed),
                        "flushed batch"
                    );

                    lock.release().await;
                    return Ok(true);
                }
                Err(e) => {
                    error!(
                        attempt,
                        max_retries = self.cfg.max_retries,
                        size = batch_len,
                        error = %e,
                        "batch upsert attempt failed"
                    );

                    if attempt >= self.cfg.max_retries {
                        break;
                    }

                    self.metrics.inc_retried();
                    sleep(Duration::from_secs(1u64 << (attempt - 1))).await;

                    if attempt >= 2 {
                        lock.extend(FLUSH_LOCK_EXTENSION).await;
                    }
                }
            }
        }

        error!(
            max_retries = self.cfg.max_retries,
            size = batch_len,
            "giving up on batch, re-queueing"
        );
        self.metrics.inc_batch_failed();
        self.total_failed.fetch_add(batch_len as u64, Ordering::Relaxed);
        self.requeue_front(batch).await;
        lock.release().await;
        Ok(false)
    }

    /// Upsert one batch inside a transaction. The pool connection is scoped
    /// to this call and released on every exit path.
    async fn write_batch(&self, records: &[EnrichedRecord]) -> AppResult<()> {
        // Dedup-path races can land the same id twice in one batch; Postgres
        // rejects a second ON CONFLICT update of the same row within one
        // statement. Keep the newest occurrence, preserve insertion order.
        let mut seen = std::collections::HashSet::new();
        let mut rows: Vec<TweetRow> = records
            .iter()
            .rev()
            .filter(|r| seen.insert(r.id.clone()))
            .map(TweetRow::from)
            .collect();
        rows.reverse();

        let mut tx = self.pool.begin().await.map_err(AppError::Sqlx)?;

        for chunk in rows.chunks(CHUNK_ROWS) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO ");
            qb.push(TweetRow::TABLE);
            qb.push(" (");
            for (i, col) in TweetRow::COLUMNS.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(*col);
            }
            qb.push(") ");

            qb.push_values(chunk.iter(), |mut b, row| {
                row.push_binds(&mut b);
            });

            qb.push(" ON CONFLICT (");
            qb.push(TweetRow::KEY);
            qb.push(") DO UPDATE SET ");
            let mut first = true;
            for col in TweetRow::COLUMNS {
                if *col == TweetRow::KEY {
                    continue;
                }
                if !first {
                    qb.push(", ");
                }
                first = false;
                qb.push(*col);
                qb.push(" = EXCLUDED.");
                qb.push(*col);
            }

            qb.build().execute(&mut *tx).await.map_err(AppError::Sqlx)?;
        }

        tx.commit().await.map_err(AppError::Sqlx)?;
        Ok(())
    }

    async fn requeue_front(&self, mut batch: Vec<EnrichedRecord>) {
        let mut queue = self.queue.lock().await;
        batch.append(&mut *queue);
        *queue = batch;
        self.metrics.set_queue_depth(queue.len() as i64);
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub fn counters(&self) -> WriterCounters {
        WriterCounters {
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
        }
    }
}
