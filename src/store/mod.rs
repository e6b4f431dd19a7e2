pub mod cache;
pub mod staging;

pub use cache::*;
pub use staging::*;

use crate::error::AppResult;
use crate::model::EnrichedRecord;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Counters reported by `Storage::stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub cached_tweets: u64,
    pub buffer_size: usize,
    pub staging_files: usize,
    pub flushes: u64,
}

/// One `store` fanning out to the hot cache and the staging buffer.
///
/// The legs run concurrently and a failure in one never aborts the other;
/// after both complete, the first failure (if any) is surfaced so the
/// consumer skips the ack and the message is redelivered.
#[derive(Debug, Clone)]
pub struct Storage {
    cache: Arc<HotCache>,
    staging: Arc<StagingBuffer>,
}

impl Storage {
    pub fn new(cache: Arc<HotCache>, staging: Arc<StagingBuffer>) -> Self {
        Self { cache, staging }
    }

    pub async fn store(&self, record: &EnrichedRecord) -> AppResult<()> {
        let (cache_res, staging_res) = tokio::join!(
            self.cache.store(record),
            self.staging.append(record.clone()),
        );

        if let Err(e) = &cache_res {
            warn!(id = %record.id, error = %e, "hot cache store failed");
        }
        if let Err(e) = &staging_res {
            warn!(id = %record.id, error = %e, "staging append failed");
        }

        cache_res.and(staging_res)
    }

    pub async fn get(&self, id: &str) -> AppResult<Option<EnrichedRecord>> {
        self.cache.get(id).await
    }

    pub async fn get_recent(&self, limit: usize) -> AppResult<Vec<EnrichedRecord>> {
        self.cache.get_recent(limit).await
    }

    pub async fn get_by_sentiment(
        &self,
        sentiment: &str,
        limit: usize,
    ) -> AppResult<Vec<EnrichedRecord>> {
        self.cache.get_by_sentiment(sentiment, limit).await
    }

    pub async fn stats(&self) -> AppResult<StorageStats> {
        Ok(StorageStats {
            cached_tweets: self.cache.cached_total().await?,
            buffer_size: self.staging.pending().await,
            staging_files: self.staging.file_count().await?,
            flushes: self.staging.flush_count(),
        })
    }

    pub async fn cleanup_old_files(&self, older_than_days: u32) -> AppResult<usize> {
        self.staging.cleanup(older_than_days).await
    }

    /// Final flush of the staging buffer. Called once during shutdown.
    pub async fn close(&self) -> AppResult<()> {
        info!("closing storage, flushing staging buffer");
        self.staging.flush().await?;

        match self.stats().await {
            Ok(stats) => info!(
                cached_tweets = stats.cached_tweets,
                staging_files = stats.staging_files,
                flushes = stats.flushes,
                "storage closed"
            ),
            // Stats are informational; a cache hiccup must not fail shutdown.
            Err(e) => warn!(error = %e, "could not read final storage stats"),
        }
        Ok(())
    }
}
