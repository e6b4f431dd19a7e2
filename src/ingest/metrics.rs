// src/ingest/metrics.rs
use crate::error::AppResult;

use prometheus::Registry;
#[cfg(feature = "metrics")]
use prometheus::{IntCounter, Opts};

/// Per-process pipeline metrics (stream -> process -> ack).
///
/// No labels by design (avoid high-cardinality early). Consumers share one
/// instance; the per-consumer split lives in logs, not metrics.
#[derive(Clone, Debug)]
pub struct PipelineMetrics {
    // --- Throughput
    #[cfg(feature = "metrics")]
    pub consumed_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub processed_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub acked_total: IntCounter,

    // --- Quality
    #[cfg(feature = "metrics")]
    pub duplicates_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub poison_total: IntCounter,
    #[cfg(feature = "metrics")]
    pub errors_total: IntCounter,

    // no-op fallback data (keeps struct non-empty without feature)
    #[cfg(not(feature = "metrics"))]
    _noop: (),
}

impl PipelineMetrics {
    /// Create and register against `registry`.
    pub fn new(registry: &Registry) -> AppResult<Self> {
        #[cfg(not(feature = "metrics"))]
        {
            let _ = registry;
            return Ok(Self { _noop: () });
        }

        #[cfg(feature = "metrics")]
        {
            let consumed_total = IntCounter::with_opts(Opts::new(
                "pipeline_consumed_total",
                "Messages received from the ingest stream",
            ))?;

            let processed_total = IntCounter::with_opts(Opts::new(
                "pipeline_processed_total",
                "Messages fully processed (enriched + stored + queued)",
            ))?;

            let acked_total = IntCounter::with_opts(Opts::new(
                "pipeline_acked_total",
                "Messages acknowledged to the consumer group",
            ))?;

            let duplicates_total = IntCounter::with_opts(Opts::new(
                "pipeline_duplicates_total",
                "Messages dropped as duplicates",
            ))?;

            let poison_total = IntCounter::with_opts(Opts::new(
                "pipeline_poison_total",
                "Malformed messages dropped (acked without processing)",
            ))?;

            let errors_total = IntCounter::with_opts(Opts::new(
                "pipeline_errors_total",
                "Processing errors leading to redelivery",
            ))?;

            registry.register(Box::new(consumed_total.clone()))?;
            registry.register(Box::new(processed_total.clone()))?;
            registry.register(Box::new(acked_total.clone()))?;
            registry.register(Box::new(duplicates_total.clone()))?;
            registry.register(Box::new(poison_total.clone()))?;
            registry.register(Box::new(errors_total.clone()))?;

            Ok(Self {
                consumed_total,
                processed_total,
                acked_total,
                duplicates_total,
                poison_total,
                errors_total,
            })
        }
    }

    // --- Helpers (safe to call unconditionally)

    #[inline]
    pub fn inc_consumed(&self) {
        #[cfg(feature = "metrics")]
        self.consumed_total.inc();
    }

    #[inline]
    pub fn inc_processed(&self) {
        #[cfg(feature = "metrics")]
        self.processed_total.inc();
    }

    #[inline]
    pub fn inc_acked(&self) {
        #[cfg(feature = "metrics")]
        self.acked_total.inc();
    }

    #[inline]
    pub fn inc_duplicate(&self) {
        #[cfg(feature = "metrics")]
        self.duplicates_total.inc();
    }

    #[inline]
    pub fn inc_poison(&self) {
        #[cfg(feature = "metrics")]
        self.poison_total.inc();
    }

    #[inline]
    pub fn inc_error(&self) {
        #[cfg(feature = "metrics")]
        self.errors_total.inc();
    }
}

/// Fresh registry for this process. Lives here so the crate root never has
/// to name the `prometheus` crate next to the `prometheus` module.
pub fn new_registry() -> Registry {
    Registry::new()
}

/// Encode a registry to Prometheus text format.
#[cfg(feature = "metrics")]
pub fn encode_text(registry: &Registry) -> AppResult<String> {
    use prometheus::{Encoder, TextEncoder};
    let mf = registry.gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&mf, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(not(feature = "metrics"))]
pub fn encode_text(_registry: &Registry) -> AppResult<String> {
    Err(crate::error::AppError::InvalidConfig(
        "metrics feature is disabled".into(),
    ))
}
