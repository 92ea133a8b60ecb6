//! Topic-based publish/subscribe on top of a [`Transport`].
//!
//! Logical destinations are either explicit topic names or Rust message
//! types, mapped to a topic name by [`topic_for`].

use crate::error::{ConfigurationError, QueueError, ValidationError};
use crate::message::{Envelope, QueueName, TopicName};
use crate::serializer::message_type_name;
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;

/// Topic name for message type `T`.
///
/// Path separators `::` become `.`; generic brackets and any other character
/// not allowed in topic names become `_`. For example
/// `orders::Envelope<orders::Placed>` maps to `orders.Envelope_orders.Placed_`.
pub fn topic_for<T: ?Sized>() -> Result<TopicName, ValidationError> {
    let name: String = message_type_name::<T>()
        .replace("::", ".")
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    TopicName::new(name)
}

/// Manages subscriptions of one transport's input queue and publishes to
/// topics
#[derive(Clone)]
pub struct TopicRouter {
    transport: Arc<Transport>,
}

impl TopicRouter {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// Subscribe the input queue to `topic`.
    ///
    /// Idempotent. The topic is created first when queue auto-creation is
    /// enabled; otherwise it must already exist.
    pub async fn subscribe(&self, topic: &TopicName) -> Result<(), QueueError> {
        let queue = self.subscriber_queue("subscribe")?;
        let client = self.transport.client();

        if self.transport.config().auto_create_queues {
            client.ensure_topic(topic).await?;
        }
        client.subscribe(topic, queue).await?;

        info!(topic = %topic, queue = %queue, "Subscribed");
        Ok(())
    }

    /// Remove the input queue's subscription to `topic`
    pub async fn unsubscribe(&self, topic: &TopicName) -> Result<(), QueueError> {
        let queue = self.subscriber_queue("unsubscribe")?;
        self.transport.client().unsubscribe(topic, queue).await?;

        info!(topic = %topic, queue = %queue, "Unsubscribed");
        Ok(())
    }

    /// Publish an envelope to every current subscriber of `topic`.
    ///
    /// Publishing to a topic without subscribers succeeds and delivers
    /// nothing. Returns the number of queues that received the envelope.
    pub async fn publish(&self, topic: &TopicName, envelope: Envelope) -> Result<usize, QueueError> {
        let envelope = self.transport.prepare(envelope);
        let wire = self.transport.encode(&envelope)?;

        let delivered = self.transport.client().publish(topic, wire).await?;
        debug!(
            topic = %topic,
            message_id = envelope.message_id().unwrap_or_default(),
            delivered = delivered,
            "Published"
        );
        Ok(delivered)
    }

    fn subscriber_queue(&self, operation: &str) -> Result<&QueueName, QueueError> {
        self.transport.address().ok_or_else(|| {
            ConfigurationError::OneWayClient {
                operation: operation.to_string(),
            }
            .into()
        })
    }
}
