//! In-process transport over tokio channels

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::mpsc;

use super::{Delivery, Envelope, Transport};
use crate::error::{HissrvError, Result};

/// Published envelopes land in the receiver returned by `new`
pub struct ChannelTransport {
    outbox: mpsc::UnboundedSender<Delivery>,
    subscriptions: Mutex<HashSet<String>>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        (
            Self {
                outbox,
                subscriptions: Mutex::new(HashSet::new()),
            },
            rx,
        )
    }

    pub fn is_subscribed(&self, key: &str) -> bool {
        self.subscriptions.lock().contains(key)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.subscriptions.lock().iter().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn publish(&self, routing_key: &str, envelope: Envelope) -> Result<()> {
        self.outbox
            .send(Delivery::new(routing_key, envelope))
            .map_err(|_| HissrvError::Transport("channel closed".to_string()))
    }

    async fn subscribe(&self, key: &str) -> Result<()> {
        self.subscriptions.lock().insert(key.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, key: &str) -> Result<()> {
        self.subscriptions.lock().remove(key);
        Ok(())
    }
}
