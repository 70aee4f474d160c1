//! In-process message bus
//!
//! Topic-keyed pub/sub used to hand tasks to project agents without a direct
//! call. Subscribers get a bounded channel per subscription, either for one
//! topic or for every topic via the wildcard [`ALL_TOPICS`].
//!
//! Publication never waits on a slow subscriber: a full channel drops the
//! message for that subscriber, a closed one is pruned.

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Subscribe to every topic
pub const ALL_TOPICS: &str = "*";

/// A published message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Message bus for pub/sub communication between components
pub struct MessageBus {
    /// Subscribers keyed by topic; `*` receives everything
    channels: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to `topic`, or to every topic with [`ALL_TOPICS`]
    pub async fn subscribe(&self, topic: &str) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels.entry(topic.to_string()).or_default().push(tx);
        rx
    }

    /// Publish to subscribers of `topic` and to wildcard subscribers
    ///
    /// Returns the number of subscribers the message was delivered to.
    pub async fn publish_message(&self, topic: &str, payload: serde_json::Value) -> usize {
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
        };

        let mut channels = self.channels.lock().await;
        let mut delivered = 0;

        for key in [topic, ALL_TOPICS] {
            if let Some(subscribers) = channels.get_mut(key) {
                subscribers.retain(|tx| match tx.try_send(message.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!("Subscriber for '{}' is full, dropping message", key);
                        true
                    }
                    Err(TrySendError::Closed(_)) => false,
                });
            }
            // Wildcard publication reaches wildcard subscribers once
            if topic == ALL_TOPICS {
                break;
            }
        }

        tracing::debug!("Published on '{}' to {} subscribers", topic, delivered);
        delivered
    }

    /// Number of live subscriptions across all topics
    pub async fn subscriber_count(&self) -> usize {
        self.channels
            .lock()
            .await
            .values()
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .sum()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl sdk::transport::MessageBus for MessageBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), EngineError> {
        self.publish_message(topic, payload).await;
        Ok(())
    }
}
