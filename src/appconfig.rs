use crate::db::config::DbConfig;
use crate::error::{AppError, AppResult};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// All tunables, assembled from the environment once at startup.
/// No component reads the environment after construction.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub redis_url: String,
    pub stream: StreamConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub enrichment: EnrichmentConfig,
    pub db: DbConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub key: String,
    pub consumer_group: String,
    pub start_from: StartFrom,
    /// Approximate stream cap (XADD MAXLEN ~).
    pub maxlen: u64,
}

/// Where a freshly-created consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrom {
    /// Only new messages. Production default.
    End,
    /// Everything in the stream. Backfill / recovery.
    Beginning,
}

impl StartFrom {
    pub fn start_id(&self) -> &'static str {
        match self {
            StartFrom::End => "$",
            StartFrom::Beginning => "0",
        }
    }
}

impl FromStr for StartFrom {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "end" | "$" => Ok(StartFrom::End),
            "beginning" | "0" => Ok(StartFrom::Beginning),
            other => Err(AppError::InvalidConfig(format!(
                "STREAM_START_FROM must be 'end' or 'beginning' (got '{other}')"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub num_workers: usize,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub staging_dir: PathBuf,
    /// Staging buffer flush threshold.
    pub buffer_limit: usize,
    pub cache_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub mode: EnrichmentMode,
    /// Inference endpoint for the transformer backend (full mode).
    pub sentiment_api_url: String,
    /// Batched-enricher accumulation size.
    pub batch_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentMode {
    /// Compact lexical analyzer. Dev / low-resource.
    Lite,
    /// Transformer classifier behind an inference service.
    Full,
}

impl EnrichmentMode {
    /// Resolution order: ENRICHMENT_MODE, then ENVIRONMENT, then lite.
    pub fn select(mode_var: Option<&str>, environment: Option<&str>) -> AppResult<Self> {
        match mode_var {
            Some("lite") => return Ok(EnrichmentMode::Lite),
            Some("full") => return Ok(EnrichmentMode::Full),
            Some(other) => {
                return Err(AppError::InvalidConfig(format!(
                    "ENRICHMENT_MODE must be 'lite' or 'full' (got '{other}')"
                )));
            }
            None => {}
        }

        Ok(match environment {
            Some("production") | Some("prod") | Some("staging") => EnrichmentMode::Full,
            _ => EnrichmentMode::Lite,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_addr: String,
    pub port: u16,
    pub metrics_path: String,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        let cfg = Self {
            redis_url: env_string("REDIS_URL", "redis://127.0.0.1:6379"),
            stream: StreamConfig {
                key: env_string("STREAM_KEY", "ingest:stream"),
                consumer_group: env_string("STREAM_CONSUMER_GROUP", "workers"),
                start_from: env_string("STREAM_START_FROM", "end").parse()?,
                maxlen: env_parse("STREAM_MAXLEN", 100_000)?,
            },
            pipeline: PipelineConfig {
                num_workers: env_parse("NUM_WORKERS", 3)?,
            },
            storage: StorageConfig {
                staging_dir: PathBuf::from(env_string("STAGING_DIR", "./staging")),
                buffer_limit: env_parse("BUFFER_LIMIT", 1000)?,
                cache_ttl_seconds: env_parse("CACHE_TTL_SECONDS", 86_400)?,
            },
            enrichment: EnrichmentConfig {
                mode: EnrichmentMode::select(
                    env::var("ENRICHMENT_MODE").ok().as_deref(),
                    env::var("ENVIRONMENT").ok().as_deref(),
                )?,
                sentiment_api_url: env_string(
                    "SENTIMENT_API_URL",
                    "http://127.0.0.1:8501/v1/sentiment",
                ),
                batch_size: env_parse("ENRICHMENT_BATCH_SIZE", 32)?,
            },
            db: DbConfig::from_env()?,
            metrics: MetricsConfig {
                enabled: env_parse("METRICS_ENABLED", true)?,
                bind_addr: env_string("METRICS_BIND_ADDR", "0.0.0.0"),
                port: env_parse("METRICS_PORT", 9200)?,
                metrics_path: env_string("METRICS_PATH", "/metrics"),
            },
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> AppResult<()> {
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(AppError::InvalidConfig(
                "REDIS_URL must start with redis:// or rediss://".into(),
            ));
        }

        if self.stream.key.is_empty() {
            return Err(AppError::MissingConfig("STREAM_KEY"));
        }
        if self.stream.consumer_group.is_empty() {
            return Err(AppError::MissingConfig("STREAM_CONSUMER_GROUP"));
        }
        if self.stream.maxlen == 0 {
            return Err(AppError::InvalidConfig("STREAM_MAXLEN must be > 0".into()));
        }

        if self.pipeline.num_workers == 0 {
            return Err(AppError::InvalidConfig("NUM_WORKERS must be > 0".into()));
        }

        if self.storage.buffer_limit == 0 {
            return Err(AppError::InvalidConfig("BUFFER_LIMIT must be > 0".into()));
        }
        if self.storage.cache_ttl_seconds == 0 {
            return Err(AppError::InvalidConfig(
                "CACHE_TTL_SECONDS must be > 0".into(),
            ));
        }
        if self.storage.staging_dir.as_os_str().is_empty() {
            return Err(AppError::MissingConfig("STAGING_DIR"));
        }

        if self.enrichment.batch_size == 0 {
            return Err(AppError::InvalidConfig(
                "ENRICHMENT_BATCH_SIZE must be > 0".into(),
            ));
        }

        self.db.validate()?;

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(AppError::InvalidConfig(
                "METRICS_PORT must be > 0 when metrics are enabled".into(),
            ));
        }

        Ok(())
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &'static str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| AppError::InvalidConfig(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_from_parses_both_spellings() {
        assert_eq!("end".parse::<StartFrom>().unwrap(), StartFrom::End);
        assert_eq!("$".parse::<StartFrom>().unwrap(), StartFrom::End);
        assert_eq!(
            "beginning".parse::<StartFrom>().unwrap(),
            StartFrom::Beginning
        );
        assert!("middle".parse::<StartFrom>().is_err());

        assert_eq!(StartFrom::End.start_id(), "$");
        assert_eq!(StartFrom::Beginning.start_id(), "0");
    }

    #[test]
    fn enrichment_mode_resolution_order() {
        // Explicit mode wins over environment.
        assert_eq!(
            EnrichmentMode::select(Some("full"), Some("development")).unwrap(),
            EnrichmentMode::Full
        );
        assert_eq!(
            EnrichmentMode::select(Some("lite"), Some("production")).unwrap(),
            EnrichmentMode::Lite
        );

        // Environment drives the default.
        assert_eq!(
            EnrichmentMode::select(None, Some("production")).unwrap(),
            EnrichmentMode::Full
        );
        assert_eq!(
            EnrichmentMode::select(None, Some("development")).unwrap(),
            EnrichmentMode::Lite
        );
        assert_eq!(
            EnrichmentMode::select(None, None).unwrap(),
            EnrichmentMode::Lite
        );

        assert!(EnrichmentMode::select(Some("turbo"), None).is_err());
    }
}
