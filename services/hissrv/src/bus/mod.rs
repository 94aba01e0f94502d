//! Message bus plumbing
//!
//! The engine talks to the bus only through `Transport`. Requests arrive
//! as `Delivery`s addressed by routing key (the tag or alert id, or the
//! service queue); replies go to the request's `replyTo` key carrying its
//! `correlationId`.

pub mod channel;
pub mod interest;
pub mod rpc;
pub mod stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;

pub use channel::ChannelTransport;
pub use interest::InterestSet;
pub use rpc::{BusClient, RpcTable};
pub use stdio::StdioTransport;

/// Message body shared by requests, replies and notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Fire-and-forget message
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
            reply_to: None,
            correlation_id: None,
        }
    }

    /// Request expecting a reply on `reply_to`
    pub fn request(
        action: impl Into<String>,
        data: Value,
        reply_to: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            reply_to: Some(reply_to.into()),
            correlation_id: Some(correlation_id.into()),
            ..Self::new(action, data)
        }
    }

    /// Reply to this envelope
    pub fn reply(&self, data: Value) -> Self {
        Self {
            action: self.action.clone(),
            data,
            reply_to: None,
            correlation_id: self.correlation_id.clone(),
        }
    }

    /// Error reply: `{"error": message}`
    pub fn error_reply(&self, message: impl std::fmt::Display) -> Self {
        self.reply(json!({ "error": message.to_string() }))
    }

    pub fn expects_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}

/// An envelope together with the routing key it was delivered under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub routing_key: String,
    #[serde(flatten)]
    pub envelope: Envelope,
}

impl Delivery {
    pub fn new(routing_key: impl Into<String>, envelope: Envelope) -> Self {
        Self {
            routing_key: routing_key.into(),
            envelope,
        }
    }
}

/// Publish/subscribe transport
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn publish(&self, routing_key: &str, envelope: Envelope) -> Result<()>;

    /// Start receiving deliveries for `key`
    async fn subscribe(&self, key: &str) -> Result<()>;

    async fn unsubscribe(&self, key: &str) -> Result<()>;
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_delivery_wire_shape() {
        let raw = r#"{"routingKey":"temp","action":"tags.uploadData","data":{"data":[]}}"#;
        let delivery: Delivery = serde_json::from_str(raw).unwrap();
        assert_eq!(delivery.routing_key, "temp");
        assert_eq!(delivery.envelope.action, "tags.uploadData");
        assert!(!delivery.envelope.expects_reply());
    }

    #[test]
    fn test_reply_keeps_correlation() {
        let request = Envelope::request("tags.downloadData", json!({}), "client", "c-1");
        let reply = request.error_reply("boom");
        assert_eq!(reply.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(reply.reply_to, None);
        assert_eq!(reply.data, json!({"error": "boom"}));

        let wire = serde_json::to_value(&reply).unwrap();
        assert!(wire.get("replyTo").is_none());
        assert_eq!(wire["correlationId"], "c-1");
    }
}
