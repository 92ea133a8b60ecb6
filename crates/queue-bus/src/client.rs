//! Client traits for the queueing medium.
//!
//! [`QueueClient`] is the data-plane surface the transport, retry pipeline and
//! topic router are written against. [`QueueAdministration`] is the management
//! surface used by tooling and tests; the runtime message path never calls it.

use crate::error::QueueError;
use crate::message::{
    DeadLetteredMessage, LeasedMessage, MessageId, QueueDescriptor, QueueName, TopicName,
    WireMessage,
};
use crate::provider::MediumLimits;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// How `ensure_queue` treats a queue that does not exist yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningMode {
    /// Create the queue if absent
    Create,
    /// Require the queue to exist; never create it
    VerifyOnly,
}

/// Main interface for queue operations against a medium
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Idempotently provision a queue.
    ///
    /// Concurrent callers all succeed; the first one creates the queue. With
    /// [`ProvisioningMode::VerifyOnly`] a missing queue yields
    /// `ProvisioningDenied` naming the queue.
    async fn ensure_queue(
        &self,
        descriptor: &QueueDescriptor,
        mode: ProvisioningMode,
    ) -> Result<(), QueueError>;

    /// Send single message to queue
    async fn send_message(
        &self,
        queue: &QueueName,
        message: WireMessage,
    ) -> Result<MessageId, QueueError>;

    /// Receive single message under a lease.
    ///
    /// Returns `Ok(None)` when nothing arrived within `timeout` and
    /// `OperationCanceled` as soon as `cancel` fires.
    async fn receive_leased(
        &self,
        queue: &QueueName,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<LeasedMessage>, QueueError>;

    /// Mark message as successfully processed
    async fn complete_message(&self, message: &LeasedMessage) -> Result<(), QueueError>;

    /// Return message to queue for redelivery
    async fn abandon_message(&self, message: &LeasedMessage) -> Result<(), QueueError>;

    /// Move message to the queue's dead-letter sub-queue
    async fn dead_letter_message(
        &self,
        message: &LeasedMessage,
        reason: &str,
    ) -> Result<(), QueueError>;

    /// Idempotently create a topic
    async fn ensure_topic(&self, topic: &TopicName) -> Result<(), QueueError>;

    /// Forward messages published to `topic` into `queue`
    async fn subscribe(&self, topic: &TopicName, queue: &QueueName) -> Result<(), QueueError>;

    /// Remove the forwarding relation; absent relations are not an error
    async fn unsubscribe(&self, topic: &TopicName, queue: &QueueName) -> Result<(), QueueError>;

    /// Fan a message out to every current subscriber, returning how many
    /// queues received it
    async fn publish(&self, topic: &TopicName, message: WireMessage) -> Result<usize, QueueError>;

    /// Size limits of the medium
    fn limits(&self) -> MediumLimits;
}

/// Management operations on queues and topics
#[async_trait]
pub trait QueueAdministration: Send + Sync {
    /// Check whether a queue exists
    async fn queue_exists(&self, queue: &QueueName) -> Result<bool, QueueError>;

    /// Get the descriptor a queue was created with
    async fn queue_descriptor(
        &self,
        queue: &QueueName,
    ) -> Result<Option<QueueDescriptor>, QueueError>;

    /// List all queues
    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError>;

    /// Delete a queue; returns whether it existed
    async fn delete_queue(&self, queue: &QueueName) -> Result<bool, QueueError>;

    /// Check whether a topic exists
    async fn topic_exists(&self, topic: &TopicName) -> Result<bool, QueueError>;

    /// List all topics
    async fn list_topics(&self) -> Result<Vec<TopicName>, QueueError>;

    /// Delete a topic and its subscriptions; returns whether it existed
    async fn delete_topic(&self, topic: &TopicName) -> Result<bool, QueueError>;

    /// Queues currently subscribed to a topic
    async fn subscribers(&self, topic: &TopicName) -> Result<Vec<QueueName>, QueueError>;

    /// Messages in a queue, visible and leased
    async fn message_count(&self, queue: &QueueName) -> Result<usize, QueueError>;

    /// Contents of a queue's dead-letter sub-queue
    async fn dead_lettered(
        &self,
        queue: &QueueName,
    ) -> Result<Vec<DeadLetteredMessage>, QueueError>;
}
