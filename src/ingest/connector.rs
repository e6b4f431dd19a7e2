// src/ingest/connector.rs

use crate::error::AppResult;
use crate::ingest::publisher::StreamPublisher;
use crate::model::RawMessage;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Seam for the upstream producer. The pipeline only knows start/stop; what
/// feeds the stream (a real firehose client, a replay tool, a test harness)
/// lives behind this trait.
#[async_trait]
pub trait StreamConnector: Send {
    async fn start(&mut self) -> AppResult<()>;

    async fn stop(&mut self) -> AppResult<()>;
}

/// Bridges an in-process channel of raw messages onto the ingest stream.
/// Whatever owns the sender half is the actual source.
pub struct ChannelConnector {
    publisher: StreamPublisher,
    rx: Option<mpsc::Receiver<RawMessage>>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl ChannelConnector {
    pub fn new(publisher: StreamPublisher, rx: mpsc::Receiver<RawMessage>) -> Self {
        Self {
            publisher,
            rx: Some(rx),
            task: None,
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl StreamConnector for ChannelConnector {
    async fn start(&mut self) -> AppResult<()> {
        let Some(mut rx) = self.rx.take() else {
            // Already started once; connectors are single-shot like the
            // pipeline that owns them.
            return Ok(());
        };

        let publisher = self.publisher.clone();
        let cancel = self.cancel.clone();

        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = publisher.publish(&msg).await {
                            error!(id = %msg.id, error = %e, "failed to publish message");
                        }
                    }
                }
            }
            info!("stream connector drained");
        }));

        info!("stream connector started");
        Ok(())
    }

    async fn stop(&mut self) -> AppResult<()> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await?;
        }
        info!("stream connector stopped");
        Ok(())
    }
}
