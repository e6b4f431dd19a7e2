use crate::db::traits::UpsertRow;
use crate::model::EnrichedRecord;
use chrono::{DateTime, Utc};
use sqlx::Postgres;
use sqlx::query_builder::Separated;
use tracing::warn;

/// The tweets table caps content at 280 characters.
const CONTENT_MAX_CHARS: usize = 280;

#[derive(Debug, Clone)]
pub struct TweetRow {
    pub id: String,
    pub content: String,
    pub author_id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub sentiment: String,
    pub confidence: f64,
    pub retweet_count: i64,
    pub like_count: i64,
    pub reply_count: i64,
    pub quote_count: i64,
    pub bookmark_count: i64,
    pub impression_count: i64,
}

impl UpsertRow for TweetRow {
    const TABLE: &'static str = "tweets";

    const COLUMNS: &'static [&'static str] = &[
        "id",
        "content",
        "author_id",
        "created_at",
        "sentiment",
        "confidence",
        "retweet_count",
        "like_count",
        "reply_count",
        "quote_count",
        "bookmark_count",
        "impression_count",
    ];

    const KEY: &'static str = "id";

    fn push_binds(&self, b: &mut Separated<'_, '_, Postgres, &'static str>) {
        b.push_bind(self.id.clone())
            .push_bind(self.content.clone())
            .push_bind(self.author_id.clone())
            .push_bind(self.created_at)
            .push_bind(self.sentiment.clone())
            .push_bind(self.confidence)
            .push_bind(self.retweet_count)
            .push_bind(self.like_count)
            .push_bind(self.reply_count)
            .push_bind(self.quote_count)
            .push_bind(self.bookmark_count)
            .push_bind(self.impression_count);
    }
}

// EnrichedRecord -> TweetRow
impl From<&EnrichedRecord> for TweetRow {
    fn from(r: &EnrichedRecord) -> Self {
        let created_at = r.created_at_utc();
        if created_at.is_none() && !r.created_at.is_empty() {
            warn!(id = %r.id, raw = %r.created_at, "unparseable created_at, nulling column");
        }

        TweetRow {
            id: r.id.clone(),
            content: r.text.chars().take(CONTENT_MAX_CHARS).collect(),
            author_id: r.author_id.clone(),
            created_at,
            sentiment: r.sentiment.as_str().to_string(),
            confidence: r.confidence,
            retweet_count: r.engagement.retweet_count,
            like_count: r.engagement.like_count,
            reply_count: r.engagement.reply_count,
            quote_count: r.engagement.quote_count,
            bookmark_count: r.engagement.bookmark_count,
            impression_count: r.engagement.impression_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Engagement, Sentiment};

    fn record(text: &str, created_at: &str) -> EnrichedRecord {
        EnrichedRecord {
            id: "t1".into(),
            text: text.into(),
            author_id: "u1".into(),
            created_at: created_at.into(),
            source: "test".into(),
            engagement: Engagement {
                like_count: 4,
                ..Default::default()
            },
            cleaned_text: text.into(),
            language: "en".into(),
            sentiment: Sentiment::Positive,
            confidence: 0.9,
            enriched_at: "2024-01-15T10:00:01Z".into(),
        }
    }

    #[test]
    fn truncates_content_to_280_chars() {
        let long = "x".repeat(400);
        let row = TweetRow::from(&record(&long, "2024-01-15T10:00:00Z"));
        assert_eq!(row.content.chars().count(), 280);
    }

    #[test]
    fn nulls_unparseable_timestamps() {
        let row = TweetRow::from(&record("hello", "last tuesday"));
        assert!(row.created_at.is_none());

        let row = TweetRow::from(&record("hello", "2024-01-15T10:00:00Z"));
        assert!(row.created_at.is_some());
    }

    #[test]
    fn key_is_a_listed_column() {
        assert!(TweetRow::COLUMNS.contains(&TweetRow::KEY));
    }
}
