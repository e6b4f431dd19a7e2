// src/enrich/remote.rs

use crate::error::{AppError, AppResult};
use crate::model::Sentiment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use super::SentimentBackend;

/// The transformer classifiers cap input length; longer text adds latency
/// without moving the label.
const MAX_INPUT_CHARS: usize = 512;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    label: String,
    score: f64,
}

/// Transformer-based sentiment backend behind an HTTP inference service.
///
/// The heavy model runs out of process; this client only ships text and maps
/// the response. Transport or protocol failures surface as errors and the
/// enricher degrades them to `(neutral, 0.5)`.
#[derive(Debug, Clone)]
pub struct RemoteClassifier {
    http: reqwest::Client,
    endpoint: String,
}

impl RemoteClassifier {
    pub fn new(endpoint: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            http,
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl SentimentBackend for RemoteClassifier {
    async fn analyze(&self, text: &str) -> AppResult<(Sentiment, f64)> {
        let truncated: String = text.chars().take(MAX_INPUT_CHARS).collect();

        let resp: ClassifyResponse = self
            .http
            .post(&self.endpoint)
            .json(&ClassifyRequest { text: &truncated })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let label = map_label(&resp.label)?;
        Ok((label, resp.score.clamp(0.0, 1.0)))
    }

    fn name(&self) -> &'static str {
        "transformer"
    }
}

/// Inference services disagree on label spelling; SST-2 style models answer
/// POSITIVE/NEGATIVE only.
fn map_label(label: &str) -> AppResult<Sentiment> {
    match label.to_ascii_lowercase().as_str() {
        "positive" | "label_1" => Ok(Sentiment::Positive),
        "negative" | "label_0" => Ok(Sentiment::Negative),
        "neutral" => Ok(Sentiment::Neutral),
        other => Err(AppError::Internal(format!(
            "unrecognized sentiment label from inference service: '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_service_labels() {
        assert_eq!(map_label("POSITIVE").unwrap(), Sentiment::Positive);
        assert_eq!(map_label("negative").unwrap(), Sentiment::Negative);
        assert_eq!(map_label("LABEL_1").unwrap(), Sentiment::Positive);
        assert_eq!(map_label("Neutral").unwrap(), Sentiment::Neutral);
        assert!(map_label("mixed").is_err());
    }
}
