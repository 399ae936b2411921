//! In-process publisher. Fans every message out over a broadcast channel and,
//! unless built with [`MemoryPublisher::broadcast_only`], records it for tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use super::Publisher;
use crate::error::PublishError;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// A message as it was handed to the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub channel: String,
    pub key: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Decode the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

pub struct MemoryPublisher {
    messages: RwLock<Vec<PublishedMessage>>,
    retain_history: bool,
    tx: broadcast::Sender<PublishedMessage>,
}

impl MemoryPublisher {
    /// A publisher that keeps every message for later inspection.
    pub fn new() -> Arc<Self> {
        Self::build(true)
    }

    /// A publisher that only broadcasts. `published()` stays empty, so memory
    /// does not grow with traffic.
    pub fn broadcast_only() -> Arc<Self> {
        Self::build(false)
    }

    fn build(retain_history: bool) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            messages: RwLock::new(Vec::new()),
            retain_history,
            tx,
        })
    }

    /// Subscribe to messages published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedMessage> {
        self.tx.subscribe()
    }

    /// Everything published so far, in order.
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.messages.read().await.clone()
    }

    /// Messages published to one channel, in order.
    pub async fn on_channel(&self, channel: &str) -> Vec<PublishedMessage> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| m.channel == channel)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn send(&self, channel: &str, key: &str, payload: &[u8]) -> Result<(), PublishError> {
        let message = PublishedMessage {
            channel: channel.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        };
        if self.retain_history {
            self.messages.write().await.push(message.clone());
        }
        debug!(channel, key, bytes = payload.len(), "Message published in memory");

        // Ok if nobody is listening
        let _ = self.tx.send(message);
        Ok(())
    }
}
