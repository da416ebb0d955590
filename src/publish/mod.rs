//! Where display payloads go.

mod mqtt;
pub use mqtt::{settings_topics, MqttConfig, MqttPublisher};

use async_trait::async_trait;

/// Errors handing a message to the messaging channel.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The MQTT client refused the message.
    #[error("mqtt publish failed: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    /// The broker connection is down. Nothing is queued for later.
    #[error("not connected to the mqtt broker")]
    Disconnected,
}

/// An already connected messaging channel.
///
/// Delivery is at most once. A publish that returns `Ok` has been handed to
/// the channel, not necessarily delivered. A publish must not wait on the
/// channel, so an unreachable broker cannot hold up the caller.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` to `topic`.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError>;
}
