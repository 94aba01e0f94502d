//! Newline-delimited JSON transport
//!
//! Every line is one `Delivery`: `{"routingKey", "action", "data",
//! "replyTo"?, "correlationId"?}`. Inbound lines are read from stdin and
//! outbound ones written to stdout, so a broker adapter can sit on the
//! other end of a pipe. Subscription changes are announced as
//! `bus.subscribe` / `bus.unsubscribe` lines on the `bus` key.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use super::{Delivery, Envelope, Transport};
use crate::error::{HissrvError, Result};

/// Routing key for subscription announcements
pub const CONTROL_KEY: &str = "bus";

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

pub struct StdioTransport {
    writer: tokio::sync::Mutex<Writer>,
    subscriptions: Mutex<HashSet<String>>,
    /// Service queue, always consumed
    queue: String,
}

impl StdioTransport {
    /// Write to stdout
    pub fn new(queue: impl Into<String>) -> Self {
        Self::with_writer(queue, Box::new(tokio::io::stdout()))
    }

    pub fn with_writer(queue: impl Into<String>, writer: Writer) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            subscriptions: Mutex::new(HashSet::new()),
            queue: queue.into(),
        }
    }

    /// Whether a delivery under `routing_key` is meant for this service
    pub fn accepts(&self, routing_key: &str) -> bool {
        routing_key == self.queue || self.subscriptions.lock().contains(routing_key)
    }

    async fn write_line(&self, delivery: &Delivery) -> Result<()> {
        let mut line = serde_json::to_vec(delivery)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Forward inbound lines to `inbound` until EOF or shutdown
    ///
    /// Malformed lines and deliveries for keys we are not subscribed to
    /// are logged and skipped. Replies (a `correlationId` without a
    /// `replyTo`) are always forwarded.
    pub async fn read_loop<R>(
        self: Arc<Self>,
        reader: R,
        inbound: mpsc::Sender<Delivery>,
        shutdown: Arc<Notify>,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        loop {
            let line = tokio::select! {
                biased;
                _ = shutdown.notified() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                info!("Bus input closed");
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            let delivery: Delivery = match serde_json::from_str(&line) {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!(error = %e, "Malformed bus line skipped");
                    continue;
                }
            };
            let is_reply = delivery.envelope.correlation_id.is_some()
                && delivery.envelope.reply_to.is_none();
            if !is_reply && !self.accepts(&delivery.routing_key) {
                debug!(routing_key = %delivery.routing_key, "Not subscribed, delivery skipped");
                continue;
            }
            if inbound.send(delivery).await.is_err() {
                return Err(HissrvError::Transport("dispatcher stopped".to_string()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn publish(&self, routing_key: &str, envelope: Envelope) -> Result<()> {
        self.write_line(&Delivery::new(routing_key, envelope)).await
    }

    async fn subscribe(&self, key: &str) -> Result<()> {
        self.write_line(&Delivery::new(
            CONTROL_KEY,
            Envelope::new("bus.subscribe", json!({ "key": key })),
        ))
        .await?;
        self.subscriptions.lock().insert(key.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, key: &str) -> Result<()> {
        self.subscriptions.lock().remove(key);
        self.write_line(&Delivery::new(
            CONTROL_KEY,
            Envelope::new("bus.unsubscribe", json!({ "key": key })),
        ))
        .await
    }
}
