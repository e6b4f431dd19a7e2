// src/store/cache.rs

use crate::error::AppResult;
use crate::model::EnrichedRecord;
use crate::redis::client::RedisClient;
use crate::redis::keys;
use futures_util::future::join_all;
use redis::AsyncCommands;
use std::collections::HashMap;

/// The recent-id list is trimmed to this many entries.
const RECENT_LIMIT: isize = 1000;

/// Hot projection of the most recent enriched records: a TTL-bounded hash
/// per record, a bounded recent-id list, a per-sentiment id set and a stored
/// counter.
///
/// One `store` call is one MULTI/EXEC pipeline, so readers never observe a
/// half-written record.
#[derive(Debug, Clone)]
pub struct HotCache {
    client: RedisClient,
    ttl_seconds: i64,
}

impl HotCache {
    pub fn new(client: RedisClient, ttl_seconds: u64) -> Self {
        Self {
            client,
            ttl_seconds: ttl_seconds as i64,
        }
    }

    pub async fn store(&self, record: &EnrichedRecord) -> AppResult<()> {
        let tweet_key = keys::tweet(&record.id);
        let sentiment_key = keys::by_sentiment(record.sentiment.as_str());
        let fields = record.to_hash_fields();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(&tweet_key, &fields)
            .ignore()
            .expire(&tweet_key, self.ttl_seconds)
            .ignore()
            .lpush(keys::RECENT_LIST, &record.id)
            .ignore()
            .ltrim(keys::RECENT_LIST, 0, RECENT_LIMIT - 1)
            .ignore()
            .sadd(&sentiment_key, &record.id)
            .ignore()
            .expire(&sentiment_key, self.ttl_seconds)
            .ignore()
            .incr(keys::CACHED_COUNTER, 1u64)
            .ignore();

        self.client
            .with_timeout(async {
                let mut conn = self.client.conn();
                pipe.query_async::<()>(&mut conn).await
            })
            .await
    }

    pub async fn get(&self, id: &str) -> AppResult<Option<EnrichedRecord>> {
        let fields: HashMap<String, String> = self
            .client
            .with_timeout(async {
                let mut conn = self.client.conn();
                conn.hgetall(keys::tweet(id)).await
            })
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        Ok(EnrichedRecord::from_hash(&fields))
    }

    /// Up to `limit` most recent records, newest first. Ids whose hash has
    /// expired are dropped.
    pub async fn get_recent(&self, limit: usize) -> AppResult<Vec<EnrichedRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = self
            .client
            .with_timeout(async {
                let mut conn = self.client.conn();
                conn.lrange(keys::RECENT_LIST, 0, limit as isize - 1).await
            })
            .await?;

        self.bulk_get(ids).await
    }

    /// Up to `limit` random members of one sentiment set.
    pub async fn get_by_sentiment(
        &self,
        sentiment: &str,
        limit: usize,
    ) -> AppResult<Vec<EnrichedRecord>> {
        let ids: Vec<String> = self
            .client
            .with_timeout(async {
                let mut conn = self.client.conn();
                conn.srandmember_multiple(keys::by_sentiment(sentiment), limit as isize)
                    .await
            })
            .await?;

        self.bulk_get(ids).await
    }

    /// Total records ever stored (monotonic while records are stored).
    pub async fn cached_total(&self) -> AppResult<u64> {
        let total: Option<u64> = self
            .client
            .with_timeout(async {
                let mut conn = self.client.conn();
                conn.get(keys::CACHED_COUNTER).await
            })
            .await?;
        Ok(total.unwrap_or(0))
    }

    async fn bulk_get(&self, ids: Vec<String>) -> AppResult<Vec<EnrichedRecord>> {
        let fetched = join_all(ids.iter().map(|id| self.get(id))).await;

        let mut out = Vec::with_capacity(fetched.len());
        for res in fetched {
            if let Some(record) = res? {
                out.push(record);
            }
        }
        Ok(out)
    }
}
