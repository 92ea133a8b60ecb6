//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory medium that:
//! - Leases received messages exclusively until completed, abandoned or expired
//! - Tracks the delivery count of every message across redeliveries
//! - Keeps a dead-letter sub-queue per queue
//! - Forwards topic publications to subscribed queues
//! - Provides thread-safe concurrent access
//!
//! All state lives behind one lock that is never held across an `.await`.

use crate::client::{ProvisioningMode, QueueAdministration, QueueClient};
use crate::error::QueueError;
use crate::message::{
    DeadLetteredMessage, LeaseToken, LeasedMessage, MessageId, QueueDescriptor, QueueName,
    Timestamp, TopicName, WireMessage,
};
use crate::provider::{InMemoryConfig, MediumLimits};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const PROVIDER_NAME: &str = "InMemory";

/// Reason recorded when the medium dead-letters on its own
pub const MAX_DELIVERY_COUNT_EXCEEDED: &str = "MaxDeliveryCountExceeded";

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Shared storage for all queues and topics
struct MediumState {
    queues: BTreeMap<QueueName, InMemoryQueue>,
    topics: BTreeMap<TopicName, BTreeSet<QueueName>>,
}

/// Internal queue state for a single queue
struct InMemoryQueue {
    descriptor: QueueDescriptor,
    /// Visible messages (FIFO order)
    messages: VecDeque<StoredMessage>,
    /// Leased messages keyed by lease token
    in_flight: HashMap<LeaseToken, InFlightMessage>,
    dead_letter: Vec<DeadLetteredMessage>,
    notify: Arc<Notify>,
}

impl InMemoryQueue {
    fn new(descriptor: QueueDescriptor) -> Self {
        Self {
            descriptor,
            messages: VecDeque::new(),
            in_flight: HashMap::new(),
            dead_letter: Vec::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Return messages whose lease ran out to the front of the queue
    fn release_expired_leases(&mut self, max_delivery_count: Option<u32>) {
        let expired: Vec<LeaseToken> = self
            .in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.is_expired())
            .map(|(lease, _)| lease.clone())
            .collect();

        for lease in expired {
            if let Some(in_flight) = self.in_flight.remove(&lease) {
                debug!(
                    queue = %self.descriptor.name,
                    message_id = %in_flight.message.message_id,
                    "Lease expired, message visible again"
                );
                self.return_to_queue(in_flight.message, max_delivery_count);
            }
        }
    }

    /// Make a message visible again, or dead-letter it once the medium's own
    /// delivery bound is reached
    fn return_to_queue(&mut self, message: StoredMessage, max_delivery_count: Option<u32>) {
        match max_delivery_count {
            Some(max) if message.delivery_count >= max => {
                warn!(
                    queue = %self.descriptor.name,
                    message_id = %message.message_id,
                    delivery_count = message.delivery_count,
                    "Message exceeded medium delivery count, dead-lettering"
                );
                self.dead_letter
                    .push(message.into_dead_lettered(MAX_DELIVERY_COUNT_EXCEEDED));
            }
            _ => {
                self.messages.push_front(message);
                self.notify.notify_one();
            }
        }
    }

    fn lease_next(&mut self, lease_duration: Duration) -> Option<LeasedMessage> {
        let mut message = self.messages.pop_front()?;
        message.delivery_count += 1;

        let lease = LeaseToken::new();
        let lease_expires_at = Timestamp::after(lease_duration);
        let leased = LeasedMessage {
            message_id: message.message_id.clone(),
            queue: self.descriptor.name.clone(),
            message: message.message.clone(),
            lease: lease.clone(),
            lease_expires_at: lease_expires_at.clone(),
            delivery_count: message.delivery_count,
            enqueued_at: message.enqueued_at.clone(),
        };

        self.in_flight.insert(
            lease,
            InFlightMessage {
                message,
                lease_expires_at,
            },
        );

        Some(leased)
    }

    /// Take back a leased message, failing if the lease is not held
    fn settle(&mut self, lease: &LeaseToken) -> Result<StoredMessage, QueueError> {
        match self.in_flight.remove(lease) {
            Some(in_flight) if !in_flight.is_expired() => Ok(in_flight.message),
            Some(in_flight) => {
                // Put it back so the expiry sweep redelivers it.
                self.in_flight.insert(lease.clone(), in_flight);
                Err(QueueError::LeaseExpired {
                    lease: lease.to_string(),
                })
            }
            None => Err(QueueError::LeaseExpired {
                lease: lease.to_string(),
            }),
        }
    }
}

/// A message stored in the queue with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    message: WireMessage,
    enqueued_at: Timestamp,
    delivery_count: u32,
}

impl StoredMessage {
    fn new(message: WireMessage) -> Self {
        let message_id = message
            .message_id
            .as_deref()
            .and_then(|id| id.parse().ok())
            .unwrap_or_default();

        Self {
            message_id,
            message,
            enqueued_at: Timestamp::now(),
            delivery_count: 0,
        }
    }

    fn into_dead_lettered(self, reason: &str) -> DeadLetteredMessage {
        DeadLetteredMessage {
            message_id: self.message_id,
            message: self.message,
            reason: reason.to_string(),
            delivery_count: self.delivery_count,
            dead_lettered_at: Timestamp::now(),
        }
    }
}

/// A message currently leased by a receiver
struct InFlightMessage {
    message: StoredMessage,
    lease_expires_at: Timestamp,
}

impl InFlightMessage {
    fn is_expired(&self) -> bool {
        Timestamp::now() >= self.lease_expires_at
    }
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queueing medium.
///
/// Cloning yields another handle onto the same medium, so several transports
/// in one process can talk to each other.
#[derive(Clone)]
pub struct InMemoryProvider {
    state: Arc<Mutex<MediumState>>,
    config: InMemoryConfig,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(MediumState {
                queues: BTreeMap::new(),
                topics: BTreeMap::new(),
            })),
            config,
        }
    }

    /// Provider configuration
    pub fn config(&self) -> &InMemoryConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, MediumState>, QueueError> {
        self.state.lock().map_err(|_| QueueError::ProviderError {
            provider: PROVIDER_NAME.to_string(),
            code: "LockPoisoned".to_string(),
            message: "in-memory medium state lock was poisoned".to_string(),
        })
    }

    fn queue_not_found(queue: &QueueName) -> QueueError {
        QueueError::QueueNotFound {
            queue_name: queue.to_string(),
        }
    }

    fn check_size(&self, message: &WireMessage) -> Result<(), QueueError> {
        let size = message.encoded_size();
        if size > self.config.limits.max_message_size {
            return Err(QueueError::SizeExceeded {
                size,
                max_size: self.config.limits.max_message_size,
            });
        }
        Ok(())
    }

    fn check_capacity(&self, queue: &InMemoryQueue) -> Result<(), QueueError> {
        if queue.messages.len() + queue.in_flight.len() >= self.config.max_queue_size {
            return Err(QueueError::ProviderError {
                provider: PROVIDER_NAME.to_string(),
                code: "QuotaExceeded".to_string(),
                message: format!(
                    "queue '{}' holds the maximum of {} messages",
                    queue.descriptor.name, self.config.max_queue_size
                ),
            });
        }
        Ok(())
    }

    fn enqueue(&self, queue: &mut InMemoryQueue, message: WireMessage) -> Result<MessageId, QueueError> {
        self.check_capacity(queue)?;

        let stored = StoredMessage::new(message);
        let message_id = stored.message_id.clone();
        queue.messages.push_back(stored);
        queue.notify.notify_one();
        Ok(message_id)
    }

    /// Run `settle` against the queue that leased `message`
    fn with_leased_queue<T>(
        &self,
        message: &LeasedMessage,
        settle: impl FnOnce(&mut InMemoryQueue) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let mut state = self.lock()?;
        let queue = state
            .queues
            .get_mut(&message.queue)
            .ok_or_else(|| Self::queue_not_found(&message.queue))?;
        settle(queue)
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueClient for InMemoryProvider {
    async fn ensure_queue(
        &self,
        descriptor: &QueueDescriptor,
        mode: ProvisioningMode,
    ) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if state.queues.contains_key(&descriptor.name) {
            debug!(queue = %descriptor.name, "Queue already exists");
            return Ok(());
        }

        match mode {
            ProvisioningMode::Create => {
                state
                    .queues
                    .insert(descriptor.name.clone(), InMemoryQueue::new(descriptor.clone()));
                info!(
                    queue = %descriptor.name,
                    partitioning = descriptor.partitioning_enabled,
                    "Created queue"
                );
                Ok(())
            }
            ProvisioningMode::VerifyOnly => Err(QueueError::ProvisioningDenied {
                queue_name: descriptor.name.to_string(),
            }),
        }
    }

    async fn send_message(
        &self,
        queue: &QueueName,
        message: WireMessage,
    ) -> Result<MessageId, QueueError> {
        self.check_size(&message)?;

        let mut state = self.lock()?;
        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| Self::queue_not_found(queue))?;
        self.enqueue(target, message)
    }

    async fn receive_leased(
        &self,
        queue: &QueueName,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<LeasedMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if cancel.is_cancelled() {
                return Err(QueueError::OperationCanceled);
            }

            let notify = {
                let mut state = self.lock()?;
                let source = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| Self::queue_not_found(queue))?;
                source.release_expired_leases(self.config.max_delivery_count);

                if let Some(leased) = source.lease_next(self.config.lease_duration) {
                    return Ok(Some(leased));
                }
                Arc::clone(&source.notify)
            };

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wake_at = deadline.min(now + self.config.poll_interval);

            tokio::select! {
                _ = cancel.cancelled() => return Err(QueueError::OperationCanceled),
                _ = notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn complete_message(&self, message: &LeasedMessage) -> Result<(), QueueError> {
        self.with_leased_queue(message, |queue| {
            queue.settle(&message.lease)?;
            debug!(queue = %message.queue, message_id = %message.message_id, "Completed message");
            Ok(())
        })
    }

    async fn abandon_message(&self, message: &LeasedMessage) -> Result<(), QueueError> {
        let max_delivery_count = self.config.max_delivery_count;
        self.with_leased_queue(message, |queue| {
            let stored = queue.settle(&message.lease)?;
            debug!(queue = %message.queue, message_id = %message.message_id, "Abandoned message");
            queue.return_to_queue(stored, max_delivery_count);
            Ok(())
        })
    }

    async fn dead_letter_message(
        &self,
        message: &LeasedMessage,
        reason: &str,
    ) -> Result<(), QueueError> {
        self.with_leased_queue(message, |queue| {
            let stored = queue.settle(&message.lease)?;
            warn!(
                queue = %message.queue,
                message_id = %message.message_id,
                reason = reason,
                "Dead-lettered message"
            );
            queue.dead_letter.push(stored.into_dead_lettered(reason));
            Ok(())
        })
    }

    async fn ensure_topic(&self, topic: &TopicName) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if !state.topics.contains_key(topic) {
            state.topics.insert(topic.clone(), BTreeSet::new());
            info!(topic = %topic, "Created topic");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &TopicName, queue: &QueueName) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if !state.queues.contains_key(queue) {
            return Err(Self::queue_not_found(queue));
        }

        let subscribers = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| QueueError::TopicNotFound {
                topic_name: topic.to_string(),
            })?;
        if subscribers.insert(queue.clone()) {
            info!(topic = %topic, queue = %queue, "Created subscription");
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &TopicName, queue: &QueueName) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if let Some(subscribers) = state.topics.get_mut(topic) {
            if subscribers.remove(queue) {
                info!(topic = %topic, queue = %queue, "Removed subscription");
            }
        }
        Ok(())
    }

    async fn publish(&self, topic: &TopicName, message: WireMessage) -> Result<usize, QueueError> {
        self.check_size(&message)?;

        let mut state = self.lock()?;
        let subscribers: Vec<QueueName> = match state.topics.get(topic) {
            Some(subscribers) => subscribers.iter().cloned().collect(),
            None => {
                debug!(topic = %topic, "Published to topic that does not exist");
                return Ok(0);
            }
        };

        let mut targets = Vec::with_capacity(subscribers.len());
        for queue_name in subscribers {
            match state.queues.get(&queue_name) {
                Some(queue) => {
                    // A full subscriber fails the publish before anything is enqueued.
                    self.check_capacity(queue)?;
                    targets.push(queue_name);
                }
                None => warn!(
                    topic = %topic,
                    queue = %queue_name,
                    "Subscribed queue no longer exists, skipping"
                ),
            }
        }

        let mut delivered = 0;
        for queue_name in targets {
            if let Some(queue) = state.queues.get_mut(&queue_name) {
                self.enqueue(queue, message.clone())?;
                delivered += 1;
            }
        }

        debug!(topic = %topic, delivered = delivered, "Published message");
        Ok(delivered)
    }

    fn limits(&self) -> MediumLimits {
        self.config
            .limits
            .with_max_delivery_count(self.config.max_delivery_count)
    }
}

#[async_trait]
impl QueueAdministration for InMemoryProvider {
    async fn queue_exists(&self, queue: &QueueName) -> Result<bool, QueueError> {
        Ok(self.lock()?.queues.contains_key(queue))
    }

    async fn queue_descriptor(
        &self,
        queue: &QueueName,
    ) -> Result<Option<QueueDescriptor>, QueueError> {
        Ok(self
            .lock()?
            .queues
            .get(queue)
            .map(|queue| queue.descriptor.clone()))
    }

    async fn list_queues(&self) -> Result<Vec<QueueName>, QueueError> {
        Ok(self.lock()?.queues.keys().cloned().collect())
    }

    async fn delete_queue(&self, queue: &QueueName) -> Result<bool, QueueError> {
        let removed = self.lock()?.queues.remove(queue).is_some();
        if removed {
            info!(queue = %queue, "Deleted queue");
        }
        Ok(removed)
    }

    async fn topic_exists(&self, topic: &TopicName) -> Result<bool, QueueError> {
        Ok(self.lock()?.topics.contains_key(topic))
    }

    async fn list_topics(&self) -> Result<Vec<TopicName>, QueueError> {
        Ok(self.lock()?.topics.keys().cloned().collect())
    }

    async fn delete_topic(&self, topic: &TopicName) -> Result<bool, QueueError> {
        let removed = self.lock()?.topics.remove(topic).is_some();
        if removed {
            info!(topic = %topic, "Deleted topic");
        }
        Ok(removed)
    }

    async fn subscribers(&self, topic: &TopicName) -> Result<Vec<QueueName>, QueueError> {
        let state = self.lock()?;
        let subscribers = state
            .topics
            .get(topic)
            .ok_or_else(|| QueueError::TopicNotFound {
                topic_name: topic.to_string(),
            })?;
        Ok(subscribers.iter().cloned().collect())
    }

    async fn message_count(&self, queue: &QueueName) -> Result<usize, QueueError> {
        let state = self.lock()?;
        let source = state
            .queues
            .get(queue)
            .ok_or_else(|| Self::queue_not_found(queue))?;
        Ok(source.messages.len() + source.in_flight.len())
    }

    async fn dead_lettered(
        &self,
        queue: &QueueName,
    ) -> Result<Vec<DeadLetteredMessage>, QueueError> {
        let state = self.lock()?;
        let source = state
            .queues
            .get(queue)
            .ok_or_else(|| Self::queue_not_found(queue))?;
        Ok(source.dead_letter.clone())
    }
}
