// tests/pipeline_live.rs
//
// End-to-end pipeline scenarios against live backends. Run with:
//   REDIS_URL=redis://127.0.0.1:6379 \
//   DATABASE_URL=postgresql://localhost/tweetpulse_test \
//   cargo test -- --ignored --nocapture
//
// Assumptions:
// - Redis with RedisBloom at REDIS_URL (redis-stack works)
// - Postgres at DATABASE_URL; the tweets table is created on demand
//
// Each test uses its own stream key and staging directory, so runs do not
// collide; ids are unique per run because the dedup confirmation set is
// shared and append-only.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::time::sleep;
use uuid::Uuid;

use crate::appconfig::{PipelineConfig, StartFrom, StreamConfig};
use crate::db::config::WriterConfig;
use crate::db::metrics::DbMetrics;
use crate::db::writer::BatchWriter;
use crate::enrich::{Enricher, LexicalAnalyzer};
use crate::ingest::metrics::{PipelineMetrics, new_registry};
use crate::ingest::pipeline::{Pipeline, PipelineState, TweetProcessor};
use crate::ingest::publisher::StreamPublisher;
use crate::model::{Engagement, RawMessage, Sentiment};
use crate::redis::client::RedisClient;
use crate::redis::dedup::Deduplicator;
use crate::redis::lock::LockManager;
use crate::store::{HotCache, StagingBuffer, Storage};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn database_url() -> String {
    std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/tweetpulse_test".to_string())
}

async fn test_client() -> RedisClient {
    RedisClient::connect(
        &redis_url(),
        Duration::from_secs(2),
        Duration::from_secs(2),
    )
    .await
    .expect("redis must be running for live tests")
}

async fn test_pool() -> PgPool {
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&database_url())
        .await
        .expect("postgres must be running for live tests");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tweets (
            id TEXT PRIMARY KEY,
            content VARCHAR(280),
            author_id TEXT,
            created_at TIMESTAMPTZ,
            sentiment TEXT,
            confidence DOUBLE PRECISION,
            retweet_count BIGINT NOT NULL DEFAULT 0,
            like_count BIGINT NOT NULL DEFAULT 0,
            reply_count BIGINT NOT NULL DEFAULT 0,
            quote_count BIGINT NOT NULL DEFAULT 0,
            bookmark_count BIGINT NOT NULL DEFAULT 0,
            impression_count BIGINT NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("tweets table creation");

    pool
}

struct Harness {
    pipeline: Pipeline,
    publisher: StreamPublisher,
    storage: Storage,
    writer: Arc<BatchWriter>,
    pool: PgPool,
    _staging_dir: tempfile::TempDir,
}

/// One isolated pipeline: fresh stream key, fresh staging dir, shared dedup
/// and relational table (ids are unique per run).
async fn harness(workers: usize, batch_size: usize, buffer_limit: usize) -> Harness {
    let client = test_client().await;
    let pool = test_pool().await;

    let stream = StreamConfig {
        key: format!("ingest:test:{}", Uuid::new_v4()),
        consumer_group: "workers".into(),
        // Tests publish before starting consumers.
        start_from: StartFrom::Beginning,
        maxlen: 10_000,
    };

    let registry = new_registry();
    let db_metrics = DbMetrics::new(&registry).unwrap();
    let pipeline_metrics = PipelineMetrics::new(&registry).unwrap();

    let staging_dir = tempfile::tempdir().unwrap();
    let locks = Arc::new(LockManager::new(client.clone()));
    let dedup = Deduplicator::new(client.clone());
    let enricher = Arc::new(Enricher::new(Arc::new(LexicalAnalyzer::new())));
    let cache = Arc::new(HotCache::new(client.clone(), 3600));
    let staging = Arc::new(StagingBuffer::new(staging_dir.path(), buffer_limit));
    let storage = Storage::new(cache, staging);

    let writer = BatchWriter::new(
        pool.clone(),
        Arc::clone(&locks),
        WriterConfig {
            batch_size,
            max_wait_seconds: 60,
            max_retries: 3,
        },
        db_metrics,
    );

    let processor = Arc::new(TweetProcessor::new(
        dedup,
        enricher,
        storage.clone(),
        Arc::clone(&writer),
        pipeline_metrics.clone(),
    ));

    let publisher = StreamPublisher::new(client.clone(), stream.key.clone(), stream.maxlen);

    let pipeline = Pipeline::new(
        client,
        stream,
        &PipelineConfig { num_workers: workers },
        None,
        processor,
        storage.clone(),
        Arc::clone(&writer),
        locks,
        pipeline_metrics,
    );

    Harness {
        pipeline,
        publisher,
        storage,
        writer,
        pool,
        _staging_dir: staging_dir,
    }
}

fn message(id: &str, text: &str) -> RawMessage {
    RawMessage {
        id: id.into(),
        text: text.into(),
        author_id: "u1".into(),
        created_at: "2024-01-15T10:00:00Z".into(),
        source: "live-test".into(),
        engagement: Engagement::default(),
    }
}

async fn db_count(pool: &PgPool, id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM tweets WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
#[ignore = "requires running Redis (RedisBloom) and Postgres"]
async fn happy_path_enriches_caches_and_persists() {
    let mut h = harness(1, 1, 1000).await;
    let id = format!("A1-{}", Uuid::new_v4());

    h.publisher
        .publish(&message(&id, "I love this!"))
        .await
        .unwrap();

    h.pipeline.start().await.unwrap();
    sleep(Duration::from_secs(2)).await;

    let record = h
        .storage
        .get(&id)
        .await
        .unwrap()
        .expect("record should be in the hot cache");
    assert_eq!(record.sentiment, Sentiment::Positive);
    assert!(record.confidence > 0.5);
    assert_eq!(record.language, "en");
    assert_eq!(record.cleaned_text, "I love this!");

    // batch_size=1 flushes on add; give a re-queued flush one extra tick.
    sleep(Duration::from_secs(2)).await;
    assert_eq!(db_count(&h.pool, &id).await, 1);

    h.pipeline.stop().await.unwrap();
    assert_eq!(h.pipeline.state(), PipelineState::Stopped);
}

#[tokio::test]
#[ignore = "requires running Redis (RedisBloom) and Postgres"]
async fn duplicate_deliveries_produce_one_record() {
    let mut h = harness(2, 1, 1000).await;
    let id = format!("A2-{}", Uuid::new_v4());
    let msg = message(&id, "I love this!");

    for _ in 0..3 {
        h.publisher.publish(&msg).await.unwrap();
    }

    h.pipeline.start().await.unwrap();
    sleep(Duration::from_secs(3)).await;

    let recent = h.storage.get_recent(1000).await.unwrap();
    assert_eq!(
        recent.iter().filter(|r| r.id == id).count(),
        1,
        "the recent list must hold the id exactly once"
    );
    assert_eq!(db_count(&h.pool, &id).await, 1);

    h.pipeline.stop().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running Redis (RedisBloom) and Postgres"]
async fn shutdown_flushes_queued_records_and_staging() {
    // Thresholds no test message can reach: everything rides the final flush.
    let mut h = harness(1, 100, 100).await;

    let ids: Vec<String> = (0..3).map(|i| format!("S6-{i}-{}", Uuid::new_v4())).collect();

    for id in &ids {
        h.publisher
            .publish(&message(id, "shutdown flush coverage message"))
            .await
            .unwrap();
    }

    h.pipeline.start().await.unwrap();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(h.writer.queue_len().await, 3, "records should be queued, not flushed");
    let staging_dir = h._staging_dir.path().to_path_buf();
    assert_eq!(std::fs::read_dir(&staging_dir).unwrap().count(), 0);

    h.pipeline.stop().await.unwrap();

    for id in &ids {
        assert_eq!(db_count(&h.pool, id).await, 1, "final flush must persist {id}");
    }

    let parquet_files: Vec<_> = std::fs::read_dir(&staging_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "parquet"))
        .collect();
    assert_eq!(parquet_files.len(), 1, "close() must write one staging file");
}
