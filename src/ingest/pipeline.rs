// src/ingest/pipeline.rs

use crate::appconfig::{PipelineConfig, StreamConfig};
use crate::db::writer::BatchWriter;
use crate::error::{AppError, AppResult};
use crate::ingest::consumer::{MessageProcessor, StreamConsumer};
use crate::ingest::connector::StreamConnector;
use crate::ingest::metrics::PipelineMetrics;
use crate::model::RawMessage;
use crate::redis::client::RedisClient;
use crate::redis::dedup::Deduplicator;
use crate::redis::lock::LockManager;
use crate::enrich::Enricher;
use crate::store::Storage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Forward-only lifecycle. A stopped pipeline is not restartable; build a
/// new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// The per-message closure every consumer runs: dedup, enrich, store, queue
/// for the batch writer. Returning Ok makes the consumer ack.
pub struct TweetProcessor {
    dedup: Deduplicator,
    enricher: Arc<Enricher>,
    storage: Storage,
    writer: Arc<BatchWriter>,
    metrics: PipelineMetrics,
}

impl TweetProcessor {
    pub fn new(
        dedup: Deduplicator,
        enricher: Arc<Enricher>,
        storage: Storage,
        writer: Arc<BatchWriter>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            dedup,
            enricher,
            storage,
            writer,
            metrics,
        }
    }
}

#[async_trait]
impl MessageProcessor for TweetProcessor {
    async fn process(&self, fields: HashMap<String, String>) -> AppResult<()> {
        let msg = match RawMessage::from_fields(&fields) {
            Ok(msg) => msg,
            // Poison: drop by acking. Retrying malformed fields forever
            // starves the group.
            Err(AppError::PoisonMessage(reason)) => {
                warn!(%reason, "dropping poison message");
                self.metrics.inc_poison();
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if self.dedup.is_duplicate(&msg.id).await? {
            debug!(id = %msg.id, "duplicate message");
            self.metrics.inc_duplicate();
            return Ok(());
        }

        let enriched = self.enricher.enrich(&msg).await;
        self.storage.store(&enriched).await?;
        self.writer.add(enriched).await;

        self.metrics.inc_processed();
        debug!(id = %msg.id, "processed message");
        Ok(())
    }
}

/// Supervises the worker fleet, the batch writer and the upstream connector.
///
/// Ownership is strictly downward: the pipeline owns its components, nothing
/// references the pipeline back.
pub struct Pipeline {
    state: PipelineState,

    client: RedisClient,
    stream: StreamConfig,
    workers: usize,

    connector: Option<Box<dyn StreamConnector>>,
    processor: Arc<TweetProcessor>,
    storage: Storage,
    writer: Arc<BatchWriter>,
    locks: Arc<LockManager>,
    metrics: PipelineMetrics,

    consumer_cancel: CancellationToken,
    writer_cancel: CancellationToken,
    consumer_tasks: Vec<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: RedisClient,
        stream: StreamConfig,
        pipeline_cfg: &PipelineConfig,
        connector: Option<Box<dyn StreamConnector>>,
        processor: Arc<TweetProcessor>,
        storage: Storage,
        writer: Arc<BatchWriter>,
        locks: Arc<LockManager>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            state: PipelineState::Initialized,
            client,
            stream,
            workers: pipeline_cfg.num_workers,
            connector,
            processor,
            storage,
            writer,
            locks,
            metrics,
            consumer_cancel: CancellationToken::new(),
            writer_cancel: CancellationToken::new(),
            consumer_tasks: Vec::new(),
            writer_task: None,
        }
    }

    #[inline]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub async fn start(&mut self) -> AppResult<()> {
        if self.state != PipelineState::Initialized {
            return Err(AppError::Internal(format!(
                "pipeline cannot start from state {:?}",
                self.state
            )));
        }
        self.state = PipelineState::Starting;
        info!("starting ingestion pipeline");

        if let Some(connector) = self.connector.as_mut() {
            connector.start().await?;
        }

        // Writer first, so process() always has somewhere to queue.
        let writer = Arc::clone(&self.writer);
        self.writer_task = Some(tokio::spawn(writer.run(self.writer_cancel.clone())));

        for i in 0..self.workers {
            let consumer = StreamConsumer::new(
                self.client.clone(),
                &self.stream,
                format!("worker-{i}"),
                Arc::clone(&self.processor) as Arc<dyn MessageProcessor>,
                self.metrics.clone(),
            );
            self.consumer_tasks
                .push(tokio::spawn(consumer.run(self.consumer_cancel.clone())));
        }

        self.state = PipelineState::Running;
        info!(workers = self.workers, stream = %self.stream.key, "pipeline started");
        Ok(())
    }

    /// Orderly shutdown: consumers drain first, then the connector stops
    /// feeding, then the writer performs its final flush, then storage closes
    /// and stale locks are swept.
    pub async fn stop(&mut self) -> AppResult<()> {
        if self.state != PipelineState::Running {
            warn!(state = ?self.state, "stop requested but pipeline is not running");
            return Ok(());
        }
        self.state = PipelineState::Stopping;
        info!("stopping ingestion pipeline");

        self.consumer_cancel.cancel();
        for task in self.consumer_tasks.drain(..) {
            if let Err(e) = task.await {
                error!(error = %e, "consumer task panicked");
            }
        }

        if let Some(connector) = self.connector.as_mut() {
            if let Err(e) = connector.stop().await {
                warn!(error = %e, "connector stop failed");
            }
        }

        self.writer_cancel.cancel();
        if let Some(task) = self.writer_task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "batch writer task panicked");
            }
        }

        if let Err(e) = self.storage.close().await {
            warn!(error = %e, "storage close failed");
        }

        // Best-effort integrity pass; locks with a TTL expire on their own.
        match self.locks.cleanup_stale_locks().await {
            Ok(removed) if removed > 0 => info!(removed, "cleaned up stale distributed locks"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to sweep stale locks"),
        }

        self.state = PipelineState::Stopped;
        info!("pipeline stopped");
        Ok(())
    }
}
