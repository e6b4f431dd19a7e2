use crate::error::{AppError, AppResult};
use std::env;

#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Postgres DSN, from DATABASE_URL.
    pub url: String,

    // Connection pool
    pub pool_max: u32,
    pub connect_timeout_ms: u64,

    pub writer: WriterConfig,
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Flush when the queue reaches this size.
    pub batch_size: usize,
    /// Flush a non-empty queue after this much wall time regardless of size.
    pub max_wait_seconds: u64,
    /// Upsert attempts per flush before giving the batch back to the queue.
    pub max_retries: u32,
}

impl DbConfig {
    pub fn from_env() -> AppResult<Self> {
        let cfg = Self {
            url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/tweetpulse".to_string()),
            pool_max: parse_env("DB_POOL_MAX", 10)?,
            connect_timeout_ms: parse_env("DB_CONNECT_TIMEOUT_MS", 5_000)?,
            writer: WriterConfig {
                batch_size: parse_env("BATCH_SIZE", 100)?,
                max_wait_seconds: parse_env("MAX_BATCH_WAIT_SECONDS", 60)?,
                max_retries: parse_env("MAX_RETRIES", 3)?,
            },
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> AppResult<()> {
        // Lightweight sanity check; sqlx does real parsing later.
        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(AppError::InvalidConfig(
                "DATABASE_URL must start with postgres:// or postgresql://".into(),
            ));
        }

        if self.pool_max == 0 {
            return Err(AppError::InvalidConfig("DB_POOL_MAX must be >= 1".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(AppError::InvalidConfig(
                "DB_CONNECT_TIMEOUT_MS must be > 0".into(),
            ));
        }

        if self.writer.batch_size == 0 {
            return Err(AppError::InvalidConfig("BATCH_SIZE must be > 0".into()));
        }
        if self.writer.max_wait_seconds == 0 {
            return Err(AppError::InvalidConfig(
                "MAX_BATCH_WAIT_SECONDS must be > 0".into(),
            ));
        }
        if self.writer.max_retries == 0 {
            return Err(AppError::InvalidConfig("MAX_RETRIES must be > 0".into()));
        }

        Ok(())
    }
}

fn parse_env<T>(key: &'static str, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| AppError::InvalidConfig(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}
