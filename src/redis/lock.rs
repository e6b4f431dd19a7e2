// src/redis/lock.rs

use crate::error::AppResult;
use crate::redis::client::RedisClient;
use crate::redis::keys;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Compare owner, delete only on match. A naive DEL could release a
/// successor's lock after our TTL already expired.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Compare owner, push expiration only on match.
const EXTEND_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
else
    return 0
end
"#;

/// Advisory cross-process lock backed by a single expiring Redis key.
///
/// SET NX PX on acquire; server-side compare-and-delete / compare-and-expire
/// for release and extend. The TTL guarantees no lock outlives a dead holder.
#[derive(Debug)]
pub struct RedisLock {
    client: RedisClient,
    lock_key: String,
    ttl: Duration,
    owner: Option<String>,
}

impl RedisLock {
    pub fn new(client: RedisClient, lock_key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client,
            lock_key: lock_key.into(),
            ttl,
            owner: None,
        }
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.lock_key
    }

    /// Try to acquire the lock.
    ///
    /// Fails closed: contention AND backend errors both report `false`.
    pub async fn acquire(&mut self) -> bool {
        let owner = Uuid::new_v4().to_string();

        let res = self
            .client
            .with_timeout(async {
                let mut conn = self.client.conn();
                let reply: Option<String> = redis::cmd("SET")
                    .arg(&self.lock_key)
                    .arg(&owner)
                    .arg("NX")
                    .arg("PX")
                    .arg(self.ttl.as_millis() as u64)
                    .query_async(&mut conn)
                    .await?;
                Ok(reply)
            })
            .await;

        match res {
            Ok(Some(_)) => {
                debug!(lock_key = %self.lock_key, "distributed lock acquired");
                self.owner = Some(owner);
                true
            }
            Ok(None) => {
                debug!(lock_key = %self.lock_key, "distributed lock contended");
                false
            }
            Err(e) => {
                warn!(lock_key = %self.lock_key, error = %e, "distributed lock acquire failed");
                false
            }
        }
    }

    /// Release the lock. Failures are logged and non-fatal; the TTL cleans up
    /// eventually.
    pub async fn release(&mut self) -> bool {
        let Some(owner) = self.owner.take() else {
            return false;
        };

        let script = redis::Script::new(RELEASE_SCRIPT);
        let res = self
            .client
            .with_timeout(async {
                let mut conn = self.client.conn();
                let deleted: i64 = script
                    .key(&self.lock_key)
                    .arg(&owner)
                    .invoke_async(&mut conn)
                    .await?;
                Ok(deleted)
            })
            .await;

        match res {
            Ok(1) => {
                debug!(lock_key = %self.lock_key, "distributed lock released");
                true
            }
            Ok(_) => {
                warn!(lock_key = %self.lock_key, "distributed lock already lost at release");
                false
            }
            Err(e) => {
                warn!(lock_key = %self.lock_key, error = %e, "distributed lock release failed");
                false
            }
        }
    }

    /// Push the expiration out by `additional`, only while we still own the key.
    pub async fn extend(&mut self, additional: Duration) -> bool {
        let Some(owner) = self.owner.clone() else {
            return false;
        };

        let script = redis::Script::new(EXTEND_SCRIPT);
        let res = self
            .client
            .with_timeout(async {
                let mut conn = self.client.conn();
                let extended: i64 = script
                    .key(&self.lock_key)
                    .arg(&owner)
                    .arg(additional.as_millis() as u64)
                    .invoke_async(&mut conn)
                    .await?;
                Ok(extended)
            })
            .await;

        match res {
            Ok(1) => {
                debug!(lock_key = %self.lock_key, additional_ms = additional.as_millis() as u64,
                    "distributed lock extended");
                true
            }
            Ok(_) => {
                warn!(lock_key = %self.lock_key, "distributed lock lost before extend");
                false
            }
            Err(e) => {
                warn!(lock_key = %self.lock_key, error = %e, "distributed lock extend failed");
                false
            }
        }
    }
}

/// Names locks under the shared `distributed_lock:` prefix and sweeps
/// integrity violations (keys without expiration).
#[derive(Debug, Clone)]
pub struct LockManager {
    client: RedisClient,
}

impl LockManager {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    /// Acquire a named lock, or None on contention / backend failure.
    pub async fn acquire_lock(&self, name: &str, ttl: Duration) -> Option<RedisLock> {
        let mut lock = RedisLock::new(self.client.clone(), keys::lock(name), ttl);
        if lock.acquire().await { Some(lock) } else { None }
    }

    /// Delete lock keys that exist without any expiration. Such keys violate
    /// the TTL invariant and would deadlock writers forever.
    pub async fn cleanup_stale_locks(&self) -> AppResult<u64> {
        let lock_keys: Vec<String> = self
            .client
            .with_timeout(async {
                let mut conn = self.client.conn();
                conn.keys(keys::lock_pattern()).await
            })
            .await?;

        let mut removed = 0u64;
        for key in lock_keys {
            let ttl_ms: i64 = self
                .client
                .with_timeout(async {
                    let mut conn = self.client.conn();
                    conn.pttl(&key).await
                })
                .await?;

            // -2: key vanished between KEYS and PTTL. -1: no expiration set.
            if ttl_ms == -1 {
                warn!(lock_key = %key, "found lock without expiration, deleting");
                let _: () = self
                    .client
                    .with_timeout(async {
                        let mut conn = self.client.conn();
                        conn.del(&key).await
                    })
                    .await?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}
