// src/redis/client.rs

use crate::error::{AppError, AppResult};
use redis::aio::ConnectionManager;
use redis::RedisResult;
use std::time::Duration;
use tokio::time::timeout;

/// Thin, "dumb" Redis client wrapper:
/// - owns a ConnectionManager
/// - enforces per-command timeouts at the wrapper boundary
///
/// No dedup / lock / cache policy belongs in here; those modules build on
/// `conn()` + `with_timeout()`.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    manager: ConnectionManager,
    command_timeout: Duration,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisClient {
    /// Create a Redis client from a URI.
    ///
    /// ConnectionManager will reconnect as needed.
    pub async fn connect(
        uri: &str,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> AppResult<Self> {
        let client = redis::Client::open(uri)
            .map_err(|e| AppError::InvalidConfig(format!("invalid redis uri '{uri}': {e}")))?;

        let manager = timeout(connect_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| {
                AppError::RedisLogic(format!("redis connect timeout after {connect_timeout:?}"))
            })??;

        Ok(Self {
            client,
            manager,
            command_timeout,
        })
    }

    /// Clone of the shared manager, for modules issuing their own commands.
    /// The manager multiplexes one connection; never run blocking commands
    /// (XREADGROUP BLOCK) on it.
    #[inline]
    pub fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// A fresh connection of its own. Blocking stream reads go here so they
    /// cannot stall the shared multiplexed connection.
    pub async fn dedicated(&self) -> AppResult<ConnectionManager> {
        Ok(ConnectionManager::new(self.client.clone()).await?)
    }

    /// Basic liveness check.
    pub async fn ping(&self) -> AppResult<()> {
        self.with_timeout(async {
            let mut conn = self.manager.clone();
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            if pong != "PONG" {
                return Err(redis::RedisError::from((
                    redis::ErrorKind::Server(redis::ServerErrorKind::ResponseError),
                    "PING did not return PONG",
                )));
            }
            Ok(())
        })
        .await
    }

    /// XADD wrapper with MAXLEN trimming:
    /// XADD key MAXLEN [~] maxlen * field value [field value ...]
    pub async fn xadd_maxlen_approx(
        &self,
        stream_key: &str,
        maxlen: u64,
        approx: bool,
        fields: &[(&str, String)],
    ) -> AppResult<String> {
        self.with_timeout(async {
            let mut conn = self.manager.clone();

            let mut cmd = redis::cmd("XADD");
            cmd.arg(stream_key);

            cmd.arg("MAXLEN");
            if approx {
                cmd.arg("~");
            }
            cmd.arg(maxlen);

            // Auto-generated entry id
            cmd.arg("*");

            for (k, v) in fields {
                cmd.arg(*k).arg(v);
            }

            let entry_id: String = cmd.query_async(&mut conn).await?;
            Ok(entry_id)
        })
        .await
    }

    /// Execute a future with the client command timeout.
    pub async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = RedisResult<T>>,
    ) -> AppResult<T> {
        timeout(self.command_timeout, fut)
            .await
            .map_err(|_| {
                AppError::RedisLogic(format!(
                    "redis command timeout after {:?}",
                    self.command_timeout
                ))
            })?
            .map_err(AppError::Redis)
    }
}
