use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Sentiment label attached during enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            other => Err(AppError::Internal(format!(
                "unknown sentiment label '{other}'"
            ))),
        }
    }
}

/// Engagement counters carried on the stream message (flat fields).
/// Absent fields default to zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub retweet_count: i64,
    pub like_count: i64,
    pub reply_count: i64,
    pub quote_count: i64,
    pub bookmark_count: i64,
    pub impression_count: i64,
}

/// A tweet as it arrives on the ingest stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub text: String,
    pub author_id: String,
    /// RFC3339 timestamp as produced by the upstream connector.
    pub created_at: String,
    pub source: String,
    #[serde(flatten)]
    pub engagement: Engagement,
}

impl RawMessage {
    /// Decode a stream entry's field map.
    ///
    /// A missing `id` or `text` makes the message poison: the caller logs it
    /// and acks so the entry is not redelivered forever.
    pub fn from_fields(fields: &HashMap<String, String>) -> AppResult<Self> {
        let id = fields
            .get("id")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::PoisonMessage("missing 'id' field".into()))?
            .clone();

        let text = fields
            .get("text")
            .ok_or_else(|| AppError::PoisonMessage(format!("message {id} missing 'text' field")))?
            .clone();

        Ok(Self {
            id,
            text,
            author_id: fields.get("author_id").cloned().unwrap_or_default(),
            created_at: fields.get("created_at").cloned().unwrap_or_default(),
            source: fields.get("source").cloned().unwrap_or_default(),
            engagement: Engagement {
                retweet_count: parse_count(fields, "retweet_count"),
                like_count: parse_count(fields, "like_count"),
                reply_count: parse_count(fields, "reply_count"),
                quote_count: parse_count(fields, "quote_count"),
                bookmark_count: parse_count(fields, "bookmark_count"),
                impression_count: parse_count(fields, "impression_count"),
            },
        })
    }

    /// Field pairs for XADD. Zero counters are still published so a consumer
    /// sees a stable field set.
    pub fn to_stream_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.clone()),
            ("text", self.text.clone()),
            ("author_id", self.author_id.clone()),
            ("created_at", self.created_at.clone()),
            ("source", self.source.clone()),
            ("retweet_count", self.engagement.retweet_count.to_string()),
            ("like_count", self.engagement.like_count.to_string()),
            ("reply_count", self.engagement.reply_count.to_string()),
            ("quote_count", self.engagement.quote_count.to_string()),
            ("bookmark_count", self.engagement.bookmark_count.to_string()),
            (
                "impression_count",
                self.engagement.impression_count.to_string(),
            ),
        ]
    }
}

fn parse_count(fields: &HashMap<String, String>, key: &str) -> i64 {
    fields
        .get(key)
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|n| *n >= 0)
        .unwrap_or(0)
}

/// A RawMessage plus derived attributes, produced by the enricher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub id: String,
    pub text: String,
    pub author_id: String,
    pub created_at: String,
    pub source: String,
    #[serde(flatten)]
    pub engagement: Engagement,

    pub cleaned_text: String,
    /// ISO 639-1 code, or "unknown" when detection failed.
    pub language: String,
    pub sentiment: Sentiment,
    /// In [0, 1].
    pub confidence: f64,
    /// RFC3339, stamped at enrichment time.
    pub enriched_at: String,
}

impl EnrichedRecord {
    /// Parsed source timestamp, if the upstream produced a valid RFC3339 one.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Flat field pairs for the cache hash.
    pub fn to_hash_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.clone()),
            ("text", self.text.clone()),
            ("author_id", self.author_id.clone()),
            ("created_at", self.created_at.clone()),
            ("source", self.source.clone()),
            ("retweet_count", self.engagement.retweet_count.to_string()),
            ("like_count", self.engagement.like_count.to_string()),
            ("reply_count", self.engagement.reply_count.to_string()),
            ("quote_count", self.engagement.quote_count.to_string()),
            ("bookmark_count", self.engagement.bookmark_count.to_string()),
            (
                "impression_count",
                self.engagement.impression_count.to_string(),
            ),
            ("cleaned_text", self.cleaned_text.clone()),
            ("language", self.language.clone()),
            ("sentiment", self.sentiment.as_str().to_string()),
            ("confidence", self.confidence.to_string()),
            ("enriched_at", self.enriched_at.clone()),
        ]
    }

    /// Rebuild a record from a cache hash. Returns None when essential fields
    /// are missing (expired key, partial write).
    pub fn from_hash(fields: &HashMap<String, String>) -> Option<Self> {
        let sentiment = fields.get("sentiment")?.parse::<Sentiment>().ok()?;
        Some(Self {
            id: fields.get("id")?.clone(),
            text: fields.get("text").cloned().unwrap_or_default(),
            author_id: fields.get("author_id").cloned().unwrap_or_default(),
            created_at: fields.get("created_at").cloned().unwrap_or_default(),
            source: fields.get("source").cloned().unwrap_or_default(),
            engagement: Engagement {
                retweet_count: parse_count(fields, "retweet_count"),
                like_count: parse_count(fields, "like_count"),
                reply_count: parse_count(fields, "reply_count"),
                quote_count: parse_count(fields, "quote_count"),
                bookmark_count: parse_count(fields, "bookmark_count"),
                impression_count: parse_count(fields, "impression_count"),
            },
            cleaned_text: fields.get("cleaned_text").cloned().unwrap_or_default(),
            language: fields.get("language").cloned().unwrap_or_default(),
            sentiment,
            confidence: fields
                .get("confidence")
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0),
            enriched_at: fields.get("enriched_at").cloned().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn from_fields_requires_id() {
        let err = RawMessage::from_fields(&fields(&[("text", "hello")])).unwrap_err();
        assert!(matches!(err, AppError::PoisonMessage(_)));

        let err = RawMessage::from_fields(&fields(&[("id", ""), ("text", "hello")])).unwrap_err();
        assert!(matches!(err, AppError::PoisonMessage(_)));
    }

    #[test]
    fn from_fields_defaults_counters_to_zero() {
        let msg = RawMessage::from_fields(&fields(&[
            ("id", "t1"),
            ("text", "hello"),
            ("like_count", "7"),
            ("reply_count", "not-a-number"),
        ]))
        .unwrap();

        assert_eq!(msg.engagement.like_count, 7);
        assert_eq!(msg.engagement.reply_count, 0);
        assert_eq!(msg.engagement.retweet_count, 0);
    }

    #[test]
    fn enriched_hash_round_trip() {
        let record = EnrichedRecord {
            id: "t42".into(),
            text: "I love this! https://x.com/a".into(),
            author_id: "u9".into(),
            created_at: "2024-01-15T10:00:00Z".into(),
            source: "twitter_stream".into(),
            engagement: Engagement {
                like_count: 3,
                ..Default::default()
            },
            cleaned_text: "I love this!".into(),
            language: "en".into(),
            sentiment: Sentiment::Positive,
            confidence: 0.82,
            enriched_at: "2024-01-15T10:00:01Z".into(),
        };

        let map: HashMap<String, String> = record
            .to_hash_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let back = EnrichedRecord::from_hash(&map).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn created_at_parsing_tolerates_garbage() {
        let mut record = EnrichedRecord {
            id: "x".into(),
            text: String::new(),
            author_id: String::new(),
            created_at: "2024-01-15T10:00:00Z".into(),
            source: String::new(),
            engagement: Engagement::default(),
            cleaned_text: String::new(),
            language: "en".into(),
            sentiment: Sentiment::Neutral,
            confidence: 0.5,
            enriched_at: String::new(),
        };
        assert!(record.created_at_utc().is_some());

        record.created_at = "yesterday-ish".into();
        assert!(record.created_at_utc().is_none());
    }
}
