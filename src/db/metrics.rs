// src/db/metrics.rs
use crate::error::AppResult;

use prometheus::Registry;
#[cfg(feature = "metrics")]
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts};

/// Batch-writer metrics. No labels; one writer per process.
#[derive(Clone, Debug)]
pub struct DbMetrics {
    #[cfg(feature = "metrics")]
    pub batches_written_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub batch_failures_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub batch_retries_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub rows_upserted_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub lock_contention_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub queue_depth: IntGauge,
    #[cfg(feature = "metrics")]
    pub flush_seconds: Histogram,

    // no-op fallback data (keeps struct non-empty without feature)
    #[cfg(not(feature = "metrics"))]
    _noop: (),
}

impl DbMetrics {
    /// Create and register against `registry`.
    pub fn new(registry: &Registry) -> AppResult<Self> {
        #[cfg(not(feature = "metrics"))]
        {
            let _ = registry;
            return Ok(Self { _noop: () });
        }

        #[cfg(feature = "metrics")]
        {
            let batches_written_total = IntCounter::with_opts(Opts::new(
                "db_batches_written_total",
                "Batches successfully upserted into the relational store",
            ))?;

            let batch_failures_total = IntCounter::with_opts(Opts::new(
                "db_batch_failures_total",
                "Flushes that gave records back to the queue (lock contention or permanent failure)",
            ))?;

            let batch_retries_total = IntCounter::with_opts(Opts::new(
                "db_batch_retries_total",
                "Upsert attempts retried after a transient failure",
            ))?;

            let rows_upserted_total = IntCounter::with_opts(Opts::new(
                "db_rows_upserted_total",
                "Rows upserted total",
            ))?;

            let lock_contention_total = IntCounter::with_opts(Opts::new(
                "db_lock_contention_total",
                "Flush attempts that lost the distributed lock race",
            ))?;

            let queue_depth = IntGauge::with_opts(Opts::new(
                "db_writer_queue_depth",
                "Records currently queued for upsert",
            ))?;

            let flush_seconds = Histogram::with_opts(HistogramOpts::new(
                "db_flush_seconds",
                "Wall time of one successful flush (lock + upsert)",
            ))?;

            registry.register(Box::new(batches_written_total.clone()))?;
            registry.register(Box::new(batch_failures_total.clone()))?;
            registry.register(Box::new(batch_retries_total.clone()))?;
            registry.register(Box::new(rows_upserted_total.clone()))?;
            registry.register(Box::new(lock_contention_total.clone()))?;
            registry.register(Box::new(queue_depth.clone()))?;
            registry.register(Box::new(flush_seconds.clone()))?;

            Ok(Self {
                batches_written_total,
                batch_failures_total,
                batch_retries_total,
                rows_upserted_total,
                lock_contention_total,
                queue_depth,
                flush_seconds,
            })
        }
    }

    // --- Helpers (safe to call unconditionally)

    #[inline]
    pub fn inc_batch_written(&self) {
        #[cfg(feature = "metrics")]
        self.batches_written_total.inc();
    }

    #[inline]
    pub fn inc_batch_failed(&self) {
        #[cfg(feature = "metrics")]
        self.batch_failures_total.inc();
    }

    #[inline]
    pub fn inc_retried(&self) {
        #[cfg(feature = "metrics")]
        self.batch_retries_total.inc();
    }

    #[inline]
    pub fn add_rows_upserted(&self, _n: u64) {
        #[cfg(feature = "metrics")]
        self.rows_upserted_total.inc_by(_n);
    }

    #[inline]
    pub fn inc_lock_contention(&self) {
        #[cfg(feature = "metrics")]
        self.lock_contention_total.inc();
    }

    #[inline]
    pub fn set_queue_depth(&self, _depth: i64) {
        #[cfg(feature = "metrics")]
        self.queue_depth.set(_depth);
    }

    #[inline]
    pub fn observe_flush_seconds(&self, _secs: f64) {
        #[cfg(feature = "metrics")]
        self.flush_seconds.observe(_secs);
    }
}
