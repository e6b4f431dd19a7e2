// src/redis/dedup.rs

use crate::error::AppResult;
use crate::redis::client::RedisClient;
use crate::redis::keys;
use redis::AsyncCommands;
use tracing::debug;

/// First-stage duplicate filter with zero false negatives.
///
/// Two server-side structures:
/// - a probabilistic filter (RedisBloom), which may report false positives;
/// - the confirmation set, exact membership and the single source of truth.
///
/// Operations are not transactional; two workers racing on the same novel id
/// may both see "not duplicate". Downstream storage upserts on id, so that
/// race is tolerated.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    client: RedisClient,
    filter_key: String,
}

impl Deduplicator {
    /// Confirmation set name, shared by every instance.
    ///
    /// Never derived from the filter key: two components with different
    /// filter prefixes still have to agree on the confirmation set, or real
    /// duplicates slip through.
    pub const SEEN_KEY: &'static str = keys::DEDUP_SEEN;

    pub fn new(client: RedisClient) -> Self {
        Self::with_filter_key(client, keys::DEDUP_BLOOM)
    }

    /// Override the filter key (per-deployment prefixes). The confirmation
    /// set stays at [`Self::SEEN_KEY`] regardless.
    pub fn with_filter_key(client: RedisClient, filter_key: impl Into<String>) -> Self {
        Self {
            client,
            filter_key: filter_key.into(),
        }
    }

    /// Has this id completed a first pass through the pipeline?
    ///
    /// Filter miss: the id is novel. Record it in both structures.
    /// Filter hit: consult the confirmation set; a miss there is a filter
    /// false positive and the id is treated as novel exactly once.
    pub async fn is_duplicate(&self, id: &str) -> AppResult<bool> {
        let in_filter: bool = self
            .client
            .with_timeout(async {
                let mut conn = self.client.conn();
                redis::cmd("BF.EXISTS")
                    .arg(&self.filter_key)
                    .arg(id)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        if !in_filter {
            self.mark_seen(id).await?;
            return Ok(false);
        }

        let confirmed: bool = self
            .client
            .with_timeout(async {
                let mut conn = self.client.conn();
                conn.sismember(Self::SEEN_KEY, id).await
            })
            .await?;

        if confirmed {
            return Ok(true);
        }

        debug!(id, "filter false positive, reconciling");
        self.mark_seen(id).await?;
        Ok(false)
    }

    async fn mark_seen(&self, id: &str) -> AppResult<()> {
        let _: () = self
            .client
            .with_timeout(async {
                let mut conn = self.client.conn();
                redis::cmd("BF.ADD")
                    .arg(&self.filter_key)
                    .arg(id)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        let _: () = self
            .client
            .with_timeout(async {
                let mut conn = self.client.conn();
                conn.sadd(Self::SEEN_KEY, id).await
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Behavior (no false negatives, false-positive reconciliation) is covered
    // by the live-Redis tests in src/tests. The naming contract is
    // construction-time and pinned here: an earlier implementation derived
    // the confirmation set name from the filter prefix, which masked real
    // duplicates across components.
    #[test]
    fn confirmation_set_name_is_fixed() {
        assert_eq!(Deduplicator::SEEN_KEY, "dedup:seen");
    }
}
