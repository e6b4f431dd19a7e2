use thiserror::Error;

/// Crate-wide result type.
pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    // =========
    // Config / startup
    // =========
    #[error("Missing configuration field: {0}")]
    MissingConfig(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =========
    // Backing stores
    // =========
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis logic error: {0}")]
    RedisLogic(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    // =========
    // Staging / filesystem
    // =========
    #[error("Staging IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    // =========
    // Remote backends
    // =========
    #[error("HTTP transport error: {0}")]
    Reqwest(#[from] reqwest::Error),

    // =========
    // Metrics / Prometheus
    // =========
    #[error("Prometheus registry error: {0}")]
    Prometheus(#[from] prometheus::Error),

    // =========
    // Application-domain errors
    // =========
    /// Malformed stream message (missing id, undecodable fields).
    /// Logged and dropped by the processor, never retried.
    #[error("Poison message: {0}")]
    PoisonMessage(String),

    #[error("Failed to spawn task: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Internal error: {0}")]
    Internal(String),
}
