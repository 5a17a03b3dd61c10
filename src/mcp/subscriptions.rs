//! Subscription bus: fans resource-change notifications out to every subscriber of a URI.
//!
//! Grounded in `mcp/http.rs`'s existing `sse_channels: HashMap<String,
//! broadcast::Sender<Value>>` pattern for the legacy SSE endpoint, generalized to a
//! per-URI multi-subscriber bus with a bounded queue per sink so one slow subscriber can't
//! back up notifications for the rest (`sse_queue_maxsize`).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

/// One broadcast channel per subscribed URI. A lagging receiver drops its oldest buffered
/// notifications rather than blocking the publisher, matching `tokio::sync::broadcast`'s
/// native overflow behavior with capacity set to `sse_queue_maxsize`.
pub struct SubscriptionBus {
    channels: RwLock<HashMap<String, broadcast::Sender<Value>>>,
    queue_maxsize: usize,
}

pub struct Subscription {
    pub uri: String,
    receiver: broadcast::Receiver<Value>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.receiver.recv().await {
                Ok(v) => return Some(v),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl SubscriptionBus {
    pub fn new(queue_maxsize: usize) -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
            queue_maxsize: queue_maxsize.max(1),
        })
    }

    /// Subscribes to `uri`, creating its channel on first use.
    pub async fn subscribe(&self, uri: &str) -> Subscription {
        let mut channels = self.channels.write().await;
        let sender = channels
            .entry(uri.to_string())
            .or_insert_with(|| broadcast::channel(self.queue_maxsize).0)
            .clone();
        Subscription {
            uri: uri.to_string(),
            receiver: sender.subscribe(),
        }
    }

    pub async fn unsubscribe(&self, uri: &str) {
        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(uri)
            && sender.receiver_count() == 0
        {
            channels.remove(uri);
        }
    }

    /// Publishes `payload` to every current subscriber of `uri`. A no-op if nobody is
    /// subscribed (`send` on a channel with zero receivers returns an error we discard).
    pub async fn publish(&self, uri: &str, payload: Value) {
        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(uri) {
            let _ = sender.send(payload);
        }
    }

    pub async fn subscriber_count(&self, uri: &str) -> usize {
        self.channels
            .read()
            .await
            .get(uri)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    pub async fn active_uris(&self) -> Vec<String> {
        self.channels.read().await.keys().cloned().collect()
    }
}
