//! # Retry Pipeline
//!
//! Wraps message handling with bounded-retry-then-dead-letter semantics.
//!
//! Every logical delivery moves through [`DeliveryState`]:
//!
//! ```text
//! Pending(1) --fail--> Pending(2) --fail--> ... Pending(max) --fail--> DeadLettered
//!      \                   \                         \
//!       +------------------+-------------------------+--ok--> Completed
//! ```
//!
//! Failed attempts are abandoned so the medium redelivers them. Once the last
//! attempt fails, the envelope is forwarded to the error queue with
//! [`ERROR_DETAILS`](crate::message::headers::ERROR_DETAILS) and
//! [`SOURCE_QUEUE`](crate::message::headers::SOURCE_QUEUE) headers and the
//! original lease is completed. If the diagnostics make the envelope too large
//! for the error queue, the message is dead-lettered natively on the medium
//! with the diagnostics as the reason instead.

use crate::config::DeliveryCountSource;
use crate::error::QueueError;
use crate::message::{headers, Envelope, QueueName};
use crate::transport::{ReceivedEnvelope, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;

/// Application callback invoked for every received envelope
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one envelope. Returning an error counts as a failed attempt.
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()>;
}

/// [`MessageHandler`] backed by an async closure
pub struct HandlerFn<F>(F);

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        (self.0)(envelope).await
    }
}

/// State of a logical delivery after one pass through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Handler failed; the message will be redelivered as `attempt`
    Pending { attempt: u32 },
    Completed,
    DeadLettered,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }
}

/// In-process delivery attempt counts keyed by message identity.
///
/// Counts are reset when a delivery completes or is dead-lettered and are
/// lost when the process restarts.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    attempts: Mutex<HashMap<String, u32>>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new attempt for `message_id` and return its number (from 1)
    pub fn record_attempt(&self, message_id: &str) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let attempt = attempts.entry(message_id.to_string()).or_insert(0);
        *attempt += 1;
        *attempt
    }

    /// Attempts recorded so far for `message_id`
    pub fn attempts(&self, message_id: &str) -> Option<u32> {
        let attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.get(message_id).copied()
    }

    /// Forget `message_id` once its delivery reached a terminal state
    pub fn reset(&self, message_id: &str) {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.remove(message_id);
    }

    /// Number of deliveries currently tracked
    pub fn len(&self) -> usize {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded retry around a [`MessageHandler`]
pub struct RetryPipeline {
    transport: Arc<Transport>,
    handler: Arc<dyn MessageHandler>,
    tracker: DeliveryTracker,
    error_queue: QueueName,
}

impl RetryPipeline {
    /// Create a pipeline dead-lettering into the transport's error queue
    pub fn new(
        transport: Arc<Transport>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, QueueError> {
        let error_queue = transport.config().error_queue_name()?;

        Ok(Self {
            transport,
            handler,
            tracker: DeliveryTracker::new(),
            error_queue,
        })
    }

    /// Provision the error queue
    pub async fn initialize(&self) -> Result<(), QueueError> {
        self.transport.ensure_queue(&self.error_queue).await
    }

    pub fn error_queue(&self) -> &QueueName {
        &self.error_queue
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    /// Run the handler for one received envelope and settle it.
    ///
    /// # Errors
    ///
    /// Returns medium errors raised while settling the message. Handler
    /// failures are not errors; they are reflected in the returned state.
    pub async fn process(&self, received: ReceivedEnvelope) -> Result<DeliveryState, QueueError> {
        let message_id = received.message_id().to_string();
        let max_attempts = self.transport.config().max_delivery_attempts;
        let attempt = self.current_attempt(&received);

        if attempt > max_attempts {
            let details = format!(
                "Message {} exceeded the maximum of {} delivery attempts (delivery {})",
                message_id, max_attempts, attempt
            );
            self.dead_letter(&received, &details).await?;
            return Ok(DeliveryState::DeadLettered);
        }

        debug!(message_id = %message_id, attempt = attempt, "Handling message");

        match self.handler.handle(received.envelope.clone()).await {
            Ok(()) => {
                self.transport.complete(&received).await?;
                self.tracker.reset(&message_id);
                debug!(message_id = %message_id, attempt = attempt, "Message completed");
                Ok(DeliveryState::Completed)
            }
            Err(err) => {
                let failure = QueueError::HandlerFailure {
                    message_id: message_id.clone(),
                    attempt,
                    message: format!("{:#}", err),
                };

                if attempt >= max_attempts || self.at_medium_cap(&received) {
                    self.dead_letter(&received, &failure.to_string()).await?;
                    return Ok(DeliveryState::DeadLettered);
                }

                warn!(
                    message_id = %message_id,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    error = %err,
                    "Handler failed; message will be redelivered"
                );
                self.transport.abandon(&received).await?;
                Ok(DeliveryState::Pending {
                    attempt: attempt + 1,
                })
            }
        }
    }

    /// The medium dead-letters on its own once this delivery is abandoned
    fn at_medium_cap(&self, received: &ReceivedEnvelope) -> bool {
        self.transport
            .codec()
            .limits()
            .max_delivery_count
            .is_some_and(|cap| received.delivery_count() >= cap)
    }

    fn current_attempt(&self, received: &ReceivedEnvelope) -> u32 {
        match self.transport.config().delivery_count_source {
            DeliveryCountSource::Medium => received.delivery_count(),
            DeliveryCountSource::InProcess => self.tracker.record_attempt(received.message_id()),
        }
    }

    async fn dead_letter(
        &self,
        received: &ReceivedEnvelope,
        details: &str,
    ) -> Result<(), QueueError> {
        let message_id = received.message_id().to_string();
        let failed = received
            .envelope
            .clone()
            .with_header(headers::ERROR_DETAILS, details)
            .with_header(headers::SOURCE_QUEUE, received.queue().as_str());

        let result = match self.transport.send(&self.error_queue, failed).await {
            Ok(_) => {
                info!(
                    message_id = %message_id,
                    error_queue = %self.error_queue,
                    "Moved message to error queue"
                );
                self.transport.complete(received).await
            }
            Err(QueueError::SizeExceeded { size, max_size }) => {
                warn!(
                    message_id = %message_id,
                    size = size,
                    max_size = max_size,
                    "Diagnostics do not fit the error queue; dead-lettering on the medium"
                );
                self.transport.dead_letter(received, details).await
            }
            Err(e) => {
                error!(
                    message_id = %message_id,
                    error_queue = %self.error_queue,
                    error = %e,
                    "Failed to forward message to error queue; returning it for redelivery"
                );
                if let Err(abandon_error) = self.transport.abandon(received).await {
                    warn!(
                        message_id = %message_id,
                        error = %abandon_error,
                        "Failed to abandon message"
                    );
                }
                return Err(e);
            }
        };

        self.tracker.reset(&message_id);
        result
    }
}
