//! # Transport
//!
//! Send and receive semantics on top of a [`QueueClient`].
//!
//! The transport owns the provisioning policy (create or verify queues), the
//! partitioning option of the queues it creates and the message size ceiling.
//! Envelopes are encoded before any medium call, so an oversized envelope
//! never results in a partial send.
//!
//! A transport configured without an input queue is one-way: it can send and
//! publish but not receive.

use crate::client::{ProvisioningMode, QueueClient};
use crate::codec::EnvelopeCodec;
use crate::config::TransportConfig;
use crate::error::{ConfigurationError, QueueError};
use crate::message::{
    headers, Envelope, LeasedMessage, MessageId, QueueDescriptor, QueueName, Timestamp,
    WireMessage,
};
use crate::retry::{RetryPolicy, RetryState};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;

/// An envelope received from the input queue together with its lease
#[derive(Debug, Clone)]
pub struct ReceivedEnvelope {
    pub envelope: Envelope,
    leased: LeasedMessage,
}

impl ReceivedEnvelope {
    /// Logical message identity; the message id header, or the medium's id
    /// when the sender did not set one
    pub fn message_id(&self) -> &str {
        self.envelope
            .message_id()
            .unwrap_or_else(|| self.leased.message_id.as_str())
    }

    /// Number of times the medium has delivered this message
    pub fn delivery_count(&self) -> u32 {
        self.leased.delivery_count
    }

    /// Queue the envelope was received from
    pub fn queue(&self) -> &QueueName {
        &self.leased.queue
    }

    /// Underlying medium lease
    pub fn leased(&self) -> &LeasedMessage {
        &self.leased
    }
}

/// Envelope transport bound to one medium and, optionally, one input queue
pub struct Transport {
    config: Arc<TransportConfig>,
    client: Arc<dyn QueueClient>,
    codec: EnvelopeCodec,
    input_queue: Option<QueueName>,
    receive_retry: RetryPolicy,
}

impl Transport {
    /// Create a transport.
    ///
    /// # Errors
    ///
    /// Returns a configuration or validation error when `config` is invalid,
    /// including a delivery bound the medium would cut short.
    pub fn new(config: TransportConfig, client: Arc<dyn QueueClient>) -> Result<Self, QueueError> {
        config.validate()?;
        let input_queue = config.input_queue_name()?;
        let limits = client
            .limits()
            .with_max_message_size(config.max_message_size);

        // Deliveries past the medium's own cap never reach the pipeline.
        if let Some(cap) = limits.max_delivery_count {
            if config.max_delivery_attempts > cap {
                return Err(ConfigurationError::Invalid {
                    message: format!(
                        "max_delivery_attempts ({}) exceeds the medium's delivery count limit ({})",
                        config.max_delivery_attempts, cap
                    ),
                }
                .into());
            }
        }

        let receive_retry = config.receive_retry.to_policy();

        Ok(Self {
            config: Arc::new(config),
            client,
            codec: EnvelopeCodec::new(limits),
            input_queue,
            receive_retry,
        })
    }

    /// Input queue of this transport; `None` for a one-way transport
    pub fn address(&self) -> Option<&QueueName> {
        self.input_queue.as_ref()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<dyn QueueClient> {
        &self.client
    }

    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    /// Provisioning mode derived from `auto_create_queues`
    pub fn provisioning_mode(&self) -> ProvisioningMode {
        if self.config.auto_create_queues {
            ProvisioningMode::Create
        } else {
            ProvisioningMode::VerifyOnly
        }
    }

    /// Provision the input queue.
    ///
    /// # Errors
    ///
    /// Returns `ProvisioningDenied` naming the queue when it is absent and
    /// automatic creation is disabled.
    pub async fn initialize(&self) -> Result<(), QueueError> {
        let Some(queue) = &self.input_queue else {
            info!("Initialized one-way transport");
            return Ok(());
        };

        self.ensure_queue(queue).await?;
        info!(
            queue = %queue,
            partitioning = self.config.partitioning_enabled,
            "Initialized transport"
        );
        Ok(())
    }

    /// Create or verify a queue according to the provisioning policy
    pub async fn ensure_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        let descriptor = QueueDescriptor::new(queue.clone())
            .with_partitioning(self.config.partitioning_enabled);

        self.client
            .ensure_queue(&descriptor, self.provisioning_mode())
            .await
            .inspect_err(|e| {
                error!(queue = %queue, error = %e, "Queue provisioning failed");
            })
    }

    /// Stamp the transport headers onto an outgoing envelope.
    ///
    /// A message id is assigned when absent; existing ids are kept so that
    /// forwarded messages retain their identity.
    pub fn prepare(&self, mut envelope: Envelope) -> Envelope {
        envelope
            .headers
            .entry(headers::MESSAGE_ID.to_string())
            .or_insert_with(|| MessageId::new().to_string());
        envelope
            .headers
            .entry(headers::SENT_TIME.to_string())
            .or_insert_with(|| Timestamp::now().to_string());
        envelope
    }

    /// Encode an envelope, enforcing the size ceiling
    pub fn encode(&self, envelope: &Envelope) -> Result<WireMessage, QueueError> {
        self.codec.encode(envelope)
    }

    /// Send an envelope to a queue.
    ///
    /// # Errors
    ///
    /// Returns `SizeExceeded` before contacting the medium when the encoded
    /// envelope is too large.
    pub async fn send(
        &self,
        destination: &QueueName,
        envelope: Envelope,
    ) -> Result<MessageId, QueueError> {
        let envelope = self.prepare(envelope);
        let wire = self.encode(&envelope)?;

        let message_id = self.client.send_message(destination, wire).await?;
        debug!(queue = %destination, message_id = %message_id, "Sent message");
        Ok(message_id)
    }

    /// Send an envelope to this transport's own input queue
    pub async fn send_local(&self, envelope: Envelope) -> Result<MessageId, QueueError> {
        let queue = self.require_input_queue("send_local")?.clone();
        self.send(&queue, envelope).await
    }

    /// Receive the next envelope from the input queue.
    ///
    /// Returns `Ok(None)` when nothing arrived within the receive timeout,
    /// when `cancel` fired, when the lease was lost, or when the received
    /// message could not be decoded (it is dead-lettered on the medium).
    /// Transient medium errors are retried with backoff.
    pub async fn receive(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ReceivedEnvelope>, QueueError> {
        let queue = self.require_input_queue("receive")?;
        let mut retry_state = RetryState::new();

        loop {
            match self
                .client
                .receive_leased(queue, self.config.receive_timeout(), cancel)
                .await
            {
                Ok(Some(leased)) => return self.open(leased).await,
                Ok(None) => return Ok(None),
                Err(e) if e.is_no_message() => return Ok(None),
                Err(e) if e.is_transient() => {
                    let Some(delay) = retry_state.next_delay(&self.receive_retry) else {
                        error!(
                            queue = %queue,
                            error = %e,
                            retries = retry_state.retries(),
                            "Receive failed after retries"
                        );
                        return Err(e);
                    };

                    warn!(
                        queue = %queue,
                        error = %e,
                        retry = retry_state.retries(),
                        delay_ms = delay.as_millis(),
                        "Retrying receive after transient medium error"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!(queue = %queue, error = %e, "Receive failed");
                    return Err(e);
                }
            }
        }
    }

    /// Complete a received envelope, removing it from the queue
    pub async fn complete(&self, received: &ReceivedEnvelope) -> Result<(), QueueError> {
        self.client.complete_message(&received.leased).await
    }

    /// Return a received envelope to the queue for redelivery
    pub async fn abandon(&self, received: &ReceivedEnvelope) -> Result<(), QueueError> {
        self.client.abandon_message(&received.leased).await
    }

    /// Move a received envelope to the input queue's dead-letter sub-queue
    pub async fn dead_letter(
        &self,
        received: &ReceivedEnvelope,
        reason: &str,
    ) -> Result<(), QueueError> {
        self.client.dead_letter_message(&received.leased, reason).await
    }

    /// Drain the input queue without processing, returning the number of
    /// messages removed. Messages leased by other receivers are left alone.
    pub async fn purge_input_queue(&self) -> Result<usize, QueueError> {
        let queue = self.require_input_queue("purge_input_queue")?;
        let cancel = CancellationToken::new();
        let mut purged = 0;

        while let Some(leased) = self
            .client
            .receive_leased(queue, Duration::ZERO, &cancel)
            .await?
        {
            match self.client.complete_message(&leased).await {
                Ok(()) => purged += 1,
                Err(e) if e.is_no_message() => {}
                Err(e) => return Err(e),
            }
        }

        info!(queue = %queue, purged = purged, "Purged input queue");
        Ok(purged)
    }

    /// Decode a leased message; undecodable messages are dead-lettered
    async fn open(&self, leased: LeasedMessage) -> Result<Option<ReceivedEnvelope>, QueueError> {
        match self.codec.decode(&leased.message) {
            Ok(envelope) => Ok(Some(ReceivedEnvelope { envelope, leased })),
            Err(e) => {
                warn!(
                    queue = %leased.queue,
                    message_id = %leased.message_id,
                    error = %e,
                    "Dead-lettering undecodable message"
                );

                match self
                    .client
                    .dead_letter_message(&leased, &e.to_string())
                    .await
                {
                    Ok(()) => Ok(None),
                    Err(settle_error) if settle_error.is_no_message() => Ok(None),
                    Err(settle_error) => Err(settle_error),
                }
            }
        }
    }

    fn require_input_queue(&self, operation: &str) -> Result<&QueueName, QueueError> {
        self.input_queue.as_ref().ok_or_else(|| {
            ConfigurationError::OneWayClient {
                operation: operation.to_string(),
            }
            .into()
        })
    }
}
