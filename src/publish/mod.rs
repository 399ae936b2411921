//! Publish channels — fire-and-forget delivery of pipeline messages.
//!
//! The orchestrator only sees [`Publisher`]. Two implementations ship:
//! - [`RestProxyPublisher`]: posts records to a Kafka REST proxy
//! - [`MemoryPublisher`]: keeps messages in process and broadcasts them

pub mod memory;
pub mod rest_proxy;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::PublishError;

pub use memory::{MemoryPublisher, PublishedMessage};
pub use rest_proxy::RestProxyPublisher;

/// Sends an already-encoded message to a named channel.
///
/// `key` is the mail id, so a broker can keep messages for one mail in order.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn send(&self, channel: &str, key: &str, payload: &[u8]) -> Result<(), PublishError>;
}

/// Encode a message as JSON for `channel`.
pub fn encode<T: Serialize>(channel: &str, message: &T) -> Result<Vec<u8>, PublishError> {
    serde_json::to_vec(message).map_err(|e| PublishError::Encode {
        channel: channel.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_json_bytes() {
        let bytes = encode("mail-output", &serde_json::json!({"id": "m-1"})).unwrap();
        assert_eq!(bytes, br#"{"id":"m-1"}"#);
    }
}
