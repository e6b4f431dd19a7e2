// src/ingest/consumer.rs

use crate::appconfig::{StartFrom, StreamConfig};
use crate::error::AppResult;
use crate::ingest::metrics::PipelineMetrics;
use crate::redis::client::RedisClient;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::streams::{StreamReadOptions, StreamReadReply};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Messages pulled per read.
const READ_COUNT: usize = 10;
/// Block timeout on XREADGROUP; bounds cancellation latency.
const BLOCK_MS: usize = 1_000;
/// Pause after an empty read.
const IDLE_SLEEP: Duration = Duration::from_millis(100);
/// Pause after a read error, so a down Redis does not spin the loop.
const ERROR_SLEEP: Duration = Duration::from_secs(1);

/// Per-message callback. An Ok return acknowledges the message; an Err leaves
/// it pending for redelivery.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, fields: HashMap<String, String>) -> AppResult<()>;
}

/// One member of the consumer group. Reads pending messages for its own
/// consumer name, invokes the processor per message in receive order, and
/// acks each success before moving on.
pub struct StreamConsumer {
    client: RedisClient,
    stream_key: String,
    group: String,
    consumer_name: String,
    start_from: StartFrom,
    processor: Arc<dyn MessageProcessor>,
    metrics: PipelineMetrics,
}

impl StreamConsumer {
    pub fn new(
        client: RedisClient,
        stream: &StreamConfig,
        consumer_name: String,
        processor: Arc<dyn MessageProcessor>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            client,
            stream_key: stream.key.clone(),
            group: stream.consumer_group.clone(),
            consumer_name,
            start_from: stream.start_from,
            processor,
            metrics,
        }
    }

    /// Main loop. Exits cleanly after the in-flight batch once cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        if let Err(e) = self.ensure_group().await {
            // The read loop will keep reporting if Redis stays unreachable.
            error!(
                consumer = %self.consumer_name,
                group = %self.group,
                error = %e,
                "consumer group creation failed"
            );
        }

        // Blocking reads get their own connection; on the shared multiplexed
        // one they would stall every other command for the block window.
        let mut read_conn = match self.client.dedicated().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(consumer = %self.consumer_name, error = %e, "could not open read connection");
                return;
            }
        };

        info!(
            consumer = %self.consumer_name,
            group = %self.group,
            stream = %self.stream_key,
            "consumer started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                read = self.read_batch(&mut read_conn) => match read {
                    Ok(reply) => {
                        if reply.keys.iter().all(|k| k.ids.is_empty()) {
                            sleep(IDLE_SLEEP).await;
                            continue;
                        }
                        self.handle_reply(reply).await;
                    }
                    Err(e) => {
                        error!(consumer = %self.consumer_name, error = %e, "stream read failed");
                        sleep(ERROR_SLEEP).await;
                    }
                }
            }
        }

        info!(consumer = %self.consumer_name, "consumer stopped");
    }

    /// Idempotent group creation. A preexisting group is the normal case for
    /// every consumer after the first.
    async fn ensure_group(&self) -> AppResult<()> {
        let res = self
            .client
            .with_timeout(async {
                let mut conn = self.client.conn();
                redis::cmd("XGROUP")
                    .arg("CREATE")
                    .arg(&self.stream_key)
                    .arg(&self.group)
                    .arg(self.start_from.start_id())
                    .arg("MKSTREAM")
                    .query_async::<()>(&mut conn)
                    .await
            })
            .await;

        match res {
            Ok(()) => {
                info!(
                    group = %self.group,
                    start_id = self.start_from.start_id(),
                    "created consumer group"
                );
                Ok(())
            }
            Err(crate::error::AppError::Redis(e)) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn read_batch(
        &self,
        conn: &mut redis::aio::ConnectionManager,
    ) -> AppResult<StreamReadReply> {
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer_name)
            .count(READ_COUNT)
            .block(BLOCK_MS);

        self.client
            .with_timeout(conn.xread_options(&[&self.stream_key], &[">"], &opts))
            .await
    }

    async fn handle_reply(&self, reply: StreamReadReply) {
        for key in reply.keys {
            for entry in key.ids {
                self.metrics.inc_consumed();

                let fields = decode_fields(&entry.map);
                match self.processor.process(fields).await {
                    Ok(()) => {
                        if let Err(e) = self.ack(&entry.id).await {
                            // The entry stays pending and will be redelivered;
                            // downstream upserts make that safe.
                            warn!(msg_id = %entry.id, error = %e, "ack failed");
                        } else {
                            self.metrics.inc_acked();
                        }
                    }
                    Err(e) => {
                        self.metrics.inc_error();
                        error!(
                            consumer = %self.consumer_name,
                            msg_id = %entry.id,
                            error = %e,
                            "processor failed, leaving message pending"
                        );
                    }
                }
            }
        }
    }

    async fn ack(&self, msg_id: &str) -> AppResult<()> {
        self.client
            .with_timeout(async {
                let mut conn = self.client.conn();
                conn.xack(&self.stream_key, &self.group, &[msg_id]).await
            })
            .await
    }
}

/// Stream entries arrive as raw values; downstream wants owned strings.
/// Binary-unsafe fields are decoded lossily rather than dropped.
fn decode_fields(map: &HashMap<String, redis::Value>) -> HashMap<String, String> {
    map.iter()
        .filter_map(|(k, v)| value_to_string(v).map(|s| (k.clone(), s)))
        .collect()
}

fn value_to_string(v: &redis::Value) -> Option<String> {
    match v {
        redis::Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        redis::Value::Int(n) => Some(n.to_string()),
        redis::Value::Okay => Some("OK".into()),
        _ => None,
    }
}
