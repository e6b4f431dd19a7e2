pub mod lexical;
pub mod remote;

pub use lexical::*;
pub use remote::*;

use crate::appconfig::{EnrichmentConfig, EnrichmentMode};
use crate::error::AppResult;
use crate::model::{EnrichedRecord, RawMessage, Sentiment};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

/// A sentiment classifier. Both backends return a label and a confidence in
/// [0, 1]; backend selection is a construction-time decision.
#[async_trait]
pub trait SentimentBackend: Send + Sync {
    async fn analyze(&self, text: &str) -> AppResult<(Sentiment, f64)>;

    fn name(&self) -> &'static str;
}

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@\w+").unwrap());
static HASHTAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#\w+").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strip URLs, mentions and hashtags; collapse whitespace runs; trim.
pub fn clean_text(text: &str) -> String {
    let text = URL_RE.replace_all(text, "");
    let text = MENTION_RE.replace_all(&text, "");
    let text = HASHTAG_RE.replace_all(&text, "");
    WHITESPACE_RE.replace_all(&text, " ").trim().to_string()
}

/// ISO 639-1 code for the detected language, or "unknown".
pub fn detect_language(text: &str) -> String {
    if text.is_empty() {
        return "unknown".into();
    }
    match whatlang::detect_lang(text) {
        Some(lang) => iso639_1(lang).to_string(),
        None => "unknown".into(),
    }
}

/// whatlang reports ISO 639-3; the cache, the relational rows and the query
/// surface all speak 639-1. Unmapped languages keep their 639-3 code.
fn iso639_1(lang: whatlang::Lang) -> &'static str {
    use whatlang::Lang;
    match lang {
        Lang::Eng => "en",
        Lang::Spa => "es",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Ita => "it",
        Lang::Por => "pt",
        Lang::Nld => "nl",
        Lang::Rus => "ru",
        Lang::Ukr => "uk",
        Lang::Pol => "pl",
        Lang::Swe => "sv",
        Lang::Dan => "da",
        Lang::Fin => "fi",
        Lang::Nob => "no",
        Lang::Tur => "tr",
        Lang::Ara => "ar",
        Lang::Heb => "he",
        Lang::Hin => "hi",
        Lang::Ben => "bn",
        Lang::Urd => "ur",
        Lang::Cmn => "zh",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        Lang::Vie => "vi",
        Lang::Tha => "th",
        Lang::Ind => "id",
        Lang::Ell => "el",
        Lang::Ces => "cs",
        Lang::Ron => "ro",
        Lang::Hun => "hu",
        other => other.code(),
    }
}

/// Turns a RawMessage into an EnrichedRecord. Never fails the caller:
/// backend errors degrade to `(neutral, 0.5)`, detector errors to "unknown".
pub struct Enricher {
    backend: Arc<dyn SentimentBackend>,
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Enricher {
    pub fn new(backend: Arc<dyn SentimentBackend>) -> Self {
        Self { backend }
    }

    pub fn from_config(cfg: &EnrichmentConfig) -> Self {
        let backend: Arc<dyn SentimentBackend> = match cfg.mode {
            EnrichmentMode::Lite => Arc::new(LexicalAnalyzer::new()),
            EnrichmentMode::Full => Arc::new(RemoteClassifier::new(&cfg.sentiment_api_url)),
        };
        info!(backend = backend.name(), "sentiment backend selected");
        Self { backend }
    }

    pub async fn enrich(&self, msg: &RawMessage) -> EnrichedRecord {
        let cleaned_text = clean_text(&msg.text);
        let language = detect_language(&cleaned_text);

        // Neutrality rules: the backends are trained on English and short
        // fragments carry no signal.
        let (sentiment, confidence) = if language != "en" || cleaned_text.chars().count() < 10 {
            (Sentiment::Neutral, 0.5)
        } else {
            match self.backend.analyze(&cleaned_text).await {
                Ok((label, score)) => (label, score.clamp(0.0, 1.0)),
                Err(e) => {
                    warn!(id = %msg.id, backend = self.backend.name(), error = %e,
                        "sentiment backend failed, degrading to neutral");
                    (Sentiment::Neutral, 0.5)
                }
            }
        };

        EnrichedRecord {
            id: msg.id.clone(),
            text: msg.text.clone(),
            author_id: msg.author_id.clone(),
            created_at: msg.created_at.clone(),
            source: msg.source.clone(),
            engagement: msg.engagement.clone(),
            cleaned_text,
            language,
            sentiment,
            confidence,
            enriched_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Accumulates up to `batch_size` messages, then enriches them concurrently.
#[derive(Debug)]
pub struct BatchEnricher {
    enricher: Arc<Enricher>,
    batch: Vec<RawMessage>,
    batch_size: usize,
}

impl BatchEnricher {
    pub fn new(enricher: Arc<Enricher>, batch_size: usize) -> Self {
        Self {
            enricher,
            batch: Vec::with_capacity(batch_size),
            batch_size,
        }
    }

    /// Add a message; returns the enriched batch when the threshold is hit.
    pub async fn add(&mut self, msg: RawMessage) -> Option<Vec<EnrichedRecord>> {
        self.batch.push(msg);
        if self.batch.len() >= self.batch_size {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Drain whatever is buffered, enriching concurrently.
    pub async fn flush(&mut self) -> Vec<EnrichedRecord> {
        if self.batch.is_empty() {
            return Vec::new();
        }

        let batch = std::mem::take(&mut self.batch);
        let enricher = Arc::clone(&self.enricher);
        join_all(batch.iter().map(|m| enricher.enrich(m))).await
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.batch.len()
    }
}
