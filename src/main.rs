mod appconfig;
mod cli;
mod db;
mod enrich;
mod error;
mod ingest;
mod model;
mod prometheus;
mod redis;
mod store;

#[cfg(test)]
mod tests;

use crate::appconfig::AppConfig;
use crate::cli::{Cli, Command};
use crate::db::metrics::DbMetrics;
use crate::db::writer::BatchWriter;
use crate::enrich::Enricher;
use crate::ingest::connector::StreamConnector;
use crate::ingest::metrics::{PipelineMetrics, encode_text, new_registry};
use crate::ingest::pipeline::{Pipeline, TweetProcessor};
use crate::prometheus::run_metrics_server;
use crate::redis::client::RedisClient;
use crate::redis::dedup::Deduplicator;
use crate::redis::lock::LockManager;
use crate::store::{HotCache, Storage, StagingBuffer};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REDIS_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;

    match cli.command {
        Command::Start { workers } => {
            if let Some(workers) = workers {
                config.pipeline.num_workers = workers;
            }
            run_pipeline(config).await
        }
        Command::Status => print_status(config).await,
        Command::Clean { older_than_days } => clean_staging(config, older_than_days).await,
    }
}

async fn run_pipeline(config: AppConfig) -> anyhow::Result<()> {
    let client = connect_redis(&config).await?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db.pool_max)
        .acquire_timeout(Duration::from_millis(config.db.connect_timeout_ms))
        .connect(&config.db.url)
        .await?;

    let registry = Arc::new(new_registry());
    let db_metrics = DbMetrics::new(&registry)?;
    let pipeline_metrics = PipelineMetrics::new(&registry)?;

    let locks = Arc::new(LockManager::new(client.clone()));
    let dedup = Deduplicator::new(client.clone());
    let enricher = Arc::new(Enricher::from_config(&config.enrichment));
    let cache = Arc::new(HotCache::new(
        client.clone(),
        config.storage.cache_ttl_seconds,
    ));
    let staging = Arc::new(StagingBuffer::new(
        &config.storage.staging_dir,
        config.storage.buffer_limit,
    ));
    let storage = Storage::new(cache, staging);

    let writer = BatchWriter::new(
        pool,
        Arc::clone(&locks),
        config.db.writer.clone(),
        db_metrics,
    );

    let processor = Arc::new(TweetProcessor::new(
        dedup,
        enricher,
        storage.clone(),
        Arc::clone(&writer),
        pipeline_metrics.clone(),
    ));

    // The upstream producer runs out of process and feeds the stream
    // directly; embedders wire a ChannelConnector here instead.
    let connector: Option<Box<dyn StreamConnector>> = None;

    let mut pipeline = Pipeline::new(
        client,
        config.stream.clone(),
        &config.pipeline,
        connector,
        processor,
        storage,
        writer,
        locks,
        pipeline_metrics,
    );

    if config.metrics.enabled {
        let metrics_cfg = config.metrics.clone();
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(metrics_cfg, move || encode_text(&registry)).await {
                tracing::error!(error = %e, "metrics server exited");
            }
        });
    }

    pipeline.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    pipeline.stop().await?;
    Ok(())
}

async fn print_status(config: AppConfig) -> anyhow::Result<()> {
    let client = connect_redis(&config).await?;

    let cache = Arc::new(HotCache::new(
        client,
        config.storage.cache_ttl_seconds,
    ));
    let staging = Arc::new(StagingBuffer::new(
        &config.storage.staging_dir,
        config.storage.buffer_limit,
    ));
    let storage = Storage::new(cache, staging);

    let stats = storage.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn clean_staging(config: AppConfig, older_than_days: u32) -> anyhow::Result<()> {
    let staging = StagingBuffer::new(&config.storage.staging_dir, config.storage.buffer_limit);
    let removed = staging.cleanup(older_than_days).await?;
    println!(
        "removed {removed} staging file(s) older than {older_than_days} day(s) from {}",
        config.storage.staging_dir.display()
    );
    Ok(())
}

async fn connect_redis(config: &AppConfig) -> anyhow::Result<RedisClient> {
    Ok(RedisClient::connect(
        &config.redis_url,
        REDIS_CONNECT_TIMEOUT,
        REDIS_COMMAND_TIMEOUT,
    )
    .await?)
}
