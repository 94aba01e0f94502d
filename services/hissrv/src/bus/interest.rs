//! Routing keys the service consumes
//!
//! The set is the source of truth; the transport's subscriptions are
//! brought in line with it on every bind and unbind.

use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::debug;

use super::Transport;
use crate::error::Result;

#[derive(Default)]
pub struct InterestSet {
    keys: Mutex<HashSet<String>>,
}

impl InterestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe or unsubscribe `key` so that membership equals `wanted`
    ///
    /// Returns true when the transport was changed. The set is only updated
    /// after the transport call succeeds.
    pub async fn reconcile(&self, key: &str, wanted: bool, transport: &dyn Transport) -> Result<bool> {
        let mut keys = self.keys.lock().await;
        match (wanted, keys.contains(key)) {
            (true, false) => {
                transport.subscribe(key).await?;
                keys.insert(key.to_string());
                debug!(key, "Subscribed");
                Ok(true)
            }
            (false, true) => {
                transport.unsubscribe(key).await?;
                keys.remove(key);
                debug!(key, "Unsubscribed");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.keys.lock().await.contains(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.lock().await.iter().cloned().collect();
        keys.sort();
        keys
    }
}
