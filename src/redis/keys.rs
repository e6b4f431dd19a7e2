// src/redis/keys.rs
//
// Every Redis key the pipeline touches is built here, so the persisted
// layout is visible in one place.

/// Recent-id list, trimmed to the most recent 1000 entries.
pub const RECENT_LIST: &str = "tweets:recent";

/// Monotonic counter of records stored in the hot cache.
pub const CACHED_COUNTER: &str = "stats:cached_tweets";

/// Approximate-filter key for the deduplicator. Instance-local by default,
/// overridable per deployment.
pub const DEDUP_BLOOM: &str = "dedup:bloom";

/// Confirmation set for the deduplicator.
///
/// This name is shared by every instance and must never be derived from the
/// filter key. Two components with different filter prefixes still have to
/// agree on the confirmation set, or real duplicates slip through.
pub const DEDUP_SEEN: &str = "dedup:seen";

const LOCK_PREFIX: &str = "distributed_lock";

/// Hash holding one cached record, TTL-bounded.
#[inline]
pub fn tweet(id: &str) -> String {
    format!("tweet:{id}")
}

/// Per-sentiment id set, TTL-bounded.
#[inline]
pub fn by_sentiment(sentiment: &str) -> String {
    format!("tweets:by_sentiment:{sentiment}")
}

#[inline]
pub fn lock(name: &str) -> String {
    format!("{LOCK_PREFIX}:{name}")
}

/// Match pattern for the stale-lock sweep.
#[inline]
pub fn lock_pattern() -> String {
    format!("{LOCK_PREFIX}:*")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_record_keys() {
        assert_eq!(tweet("1755"), "tweet:1755");
        assert_eq!(by_sentiment("positive"), "tweets:by_sentiment:positive");
    }

    #[test]
    fn builds_lock_keys() {
        assert_eq!(lock("batch_writer_flush:100"), "distributed_lock:batch_writer_flush:100");
        assert_eq!(lock_pattern(), "distributed_lock:*");
    }

    #[test]
    fn confirmation_set_is_a_fixed_shared_name() {
        // Shared across all instances; not derived from DEDUP_BLOOM.
        assert_eq!(DEDUP_SEEN, "dedup:seen");
        assert!(!DEDUP_SEEN.starts_with(DEDUP_BLOOM));
    }
}
