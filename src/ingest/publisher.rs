// src/ingest/publisher.rs

use crate::error::AppResult;
use crate::model::RawMessage;
use crate::redis::client::RedisClient;
use tracing::debug;

/// Appends raw messages to the capped ingest stream.
///
/// Trimming is approximate (MAXLEN ~): Redis drops whole macro nodes, so the
/// stream hovers slightly above the cap instead of paying an exact trim on
/// every append.
#[derive(Debug, Clone)]
pub struct StreamPublisher {
    client: RedisClient,
    stream_key: String,
    maxlen: u64,
}

impl StreamPublisher {
    pub fn new(client: RedisClient, stream_key: impl Into<String>, maxlen: u64) -> Self {
        Self {
            client,
            stream_key: stream_key.into(),
            maxlen,
        }
    }

    /// Returns the assigned stream entry id.
    pub async fn publish(&self, msg: &RawMessage) -> AppResult<String> {
        let entry_id = self
            .client
            .xadd_maxlen_approx(&self.stream_key, self.maxlen, true, &msg.to_stream_fields())
            .await?;

        debug!(id = %msg.id, entry_id = %entry_id, "published message to stream");
        Ok(entry_id)
    }
}
