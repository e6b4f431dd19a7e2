// tests/coordination_live.rs
//
// Live-backend tests for the deduplicator, the distributed lock and the hot
// cache. Run with:
//   REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored --nocapture
//
// Assumptions:
// - Redis with the RedisBloom module is already running at REDIS_URL
//   (redis-stack works out of the box)

use std::time::Duration;

use uuid::Uuid;

use crate::model::{EnrichedRecord, Engagement, Sentiment};
use crate::redis::client::RedisClient;
use crate::redis::dedup::Deduplicator;
use crate::redis::lock::LockManager;
use crate::store::cache::HotCache;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
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

fn unique_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires running Redis with RedisBloom"]
async fn dedup_has_no_false_negatives() {
    let client = test_client().await;
    let dedup = Deduplicator::new(client);

    let id = unique_id("dedup-nfn");

    assert!(!dedup.is_duplicate(&id).await.unwrap(), "first sight must be novel");
    assert!(dedup.is_duplicate(&id).await.unwrap());
    assert!(dedup.is_duplicate(&id).await.unwrap());
}

#[tokio::test]
#[ignore = "requires running Redis with RedisBloom"]
async fn dedup_reconciles_filter_false_positives() {
    let client = test_client().await;
    let dedup = Deduplicator::new(client.clone());

    // Simulate a filter false positive: the id is in the bloom filter but
    // never completed a pass (absent from the confirmation set).
    let id = unique_id("dedup-fp");
    let _: () = client
        .with_timeout(async {
            let mut conn = client.conn();
            redis::cmd("BF.ADD")
                .arg("dedup:bloom")
                .arg(&id)
                .query_async(&mut conn)
                .await
        })
        .await
        .unwrap();

    // Reconciled exactly once, then a duplicate forever.
    assert!(!dedup.is_duplicate(&id).await.unwrap());
    assert!(dedup.is_duplicate(&id).await.unwrap());
}

#[tokio::test]
#[ignore = "requires running Redis"]
async fn lock_is_mutually_exclusive() {
    let client = test_client().await;
    let manager_a = LockManager::new(client.clone());
    let manager_b = LockManager::new(client);

    let name = unique_id("lock-mx");
    let ttl = Duration::from_secs(10);

    let mut held = manager_a
        .acquire_lock(&name, ttl)
        .await
        .expect("first acquire should win");

    assert!(
        manager_b.acquire_lock(&name, ttl).await.is_none(),
        "second acquire must observe contention"
    );

    assert!(held.release().await);

    // Released: the name is acquirable again.
    let mut reacquired = manager_b
        .acquire_lock(&name, ttl)
        .await
        .expect("acquire after release should win");
    reacquired.release().await;
}

#[tokio::test]
#[ignore = "requires running Redis"]
async fn lock_expires_with_its_ttl() {
    let client = test_client().await;
    let manager = LockManager::new(client);

    let name = unique_id("lock-ttl");

    let _held = manager
        .acquire_lock(&name, Duration::from_millis(300))
        .await
        .expect("first acquire should win");

    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut after = manager
        .acquire_lock(&name, Duration::from_secs(5))
        .await
        .expect("expired lock must be acquirable");
    after.release().await;
}

fn sample_record(id: &str) -> EnrichedRecord {
    EnrichedRecord {
        id: id.into(),
        text: "I love this!".into(),
        author_id: "u1".into(),
        created_at: "2024-01-15T10:00:00Z".into(),
        source: "live-test".into(),
        engagement: Engagement::default(),
        cleaned_text: "I love this!".into(),
        language: "en".into(),
        sentiment: Sentiment::Positive,
        confidence: 0.8,
        enriched_at: "2024-01-15T10:00:01Z".into(),
    }
}

#[tokio::test]
#[ignore = "requires running Redis"]
async fn cache_store_and_read_back() {
    let client = test_client().await;
    let cache = HotCache::new(client, 60);

    let id = unique_id("cache");
    let record = sample_record(&id);

    let before = cache.cached_total().await.unwrap();
    cache.store(&record).await.unwrap();

    let read = cache.get(&id).await.unwrap().expect("record should be cached");
    assert_eq!(read, record);

    // Counter moved, recent list leads with the id, sentiment set knows it.
    assert_eq!(cache.cached_total().await.unwrap(), before + 1);

    let recent = cache.get_recent(5).await.unwrap();
    assert!(recent.iter().any(|r| r.id == id));

    let positives = cache.get_by_sentiment("positive", 10_000).await.unwrap();
    assert!(positives.iter().any(|r| r.id == id));
}

#[tokio::test]
#[ignore = "requires running Redis"]
async fn cache_misses_return_none() {
    let client = test_client().await;
    let cache = HotCache::new(client, 60);

    assert!(cache.get(&unique_id("missing")).await.unwrap().is_none());
}
