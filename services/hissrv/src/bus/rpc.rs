//! Request/reply correlation over the bus
//!
//! Each outgoing request gets a fresh uuid v4 correlation id mapped to a
//! oneshot sender. The reply is matched by id; requests that time out are
//! removed, and replies arriving afterwards are dropped.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Envelope, Transport};
use crate::error::{HissrvError, Result};

/// Pending requests keyed by correlation id
pub struct RpcTable {
    pending: DashMap<String, oneshot::Sender<Envelope>>,
    timeout: Duration,
}

impl RpcTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allocate a correlation id and the receiver its reply will land in
    pub fn register(&self) -> (String, oneshot::Receiver<Envelope>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        (id, rx)
    }

    /// Hand a reply to its waiter; false for unknown or late replies
    pub fn complete(&self, correlation_id: &str, reply: Envelope) -> bool {
        let Some((_, tx)) = self.pending.remove(correlation_id) else {
            debug!(correlation_id, "Reply for unknown or expired request dropped");
            return false;
        };
        if tx.send(reply).is_err() {
            debug!(correlation_id, "Requester gone, reply dropped");
            return false;
        }
        true
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Await the reply for `correlation_id`, forgetting it on timeout
    pub async fn wait(
        &self,
        correlation_id: &str,
        rx: oneshot::Receiver<Envelope>,
    ) -> Result<Envelope> {
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.remove(correlation_id);
                Err(HissrvError::Transport(format!(
                    "request {correlation_id} cancelled"
                )))
            }
            Err(_) => {
                self.pending.remove(correlation_id);
                warn!(correlation_id, timeout_ms = self.timeout.as_millis() as u64, "Request timed out");
                Err(HissrvError::Timeout(correlation_id.to_string()))
            }
        }
    }
}

/// Outgoing side of the bus: RPC calls and notifications
#[derive(Clone)]
pub struct BusClient {
    transport: Arc<dyn Transport>,
    rpc: Arc<RpcTable>,
    /// Key replies to our requests are addressed to
    reply_to: String,
}

impl BusClient {
    pub fn new(transport: Arc<dyn Transport>, rpc: Arc<RpcTable>, reply_to: impl Into<String>) -> Self {
        Self {
            transport,
            rpc,
            reply_to: reply_to.into(),
        }
    }

    pub fn rpc(&self) -> &Arc<RpcTable> {
        &self.rpc
    }

    /// Fire-and-forget publish
    pub async fn notify(&self, routing_key: &str, action: &str, data: Value) -> Result<()> {
        self.transport
            .publish(routing_key, Envelope::new(action, data))
            .await
    }

    /// Publish a request and await its reply body
    ///
    /// A reply of the form `{"error": ...}` is returned as a transport error.
    pub async fn request(&self, routing_key: &str, action: &str, data: Value) -> Result<Value> {
        let (id, rx) = self.rpc.register();
        let envelope = Envelope::request(action, data, self.reply_to.clone(), id.clone());
        if let Err(e) = self.transport.publish(routing_key, envelope).await {
            self.rpc.pending.remove(&id);
            return Err(e);
        }

        let reply = self.rpc.wait(&id, rx).await?;
        if let Some(error) = reply.data.get("error").and_then(Value::as_str) {
            return Err(HissrvError::Transport(format!("{action} failed: {error}")));
        }
        Ok(reply.data)
    }
}
