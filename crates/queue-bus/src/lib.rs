//! # Queue Bus
//!
//! Message-transport reliability core for at-least-once queueing media.
//!
//! This library provides:
//! - Envelope encoding that never truncates oversized headers
//! - Queue provisioning with create or verify-only policies
//! - Cancellable, lease-based receives with backoff on transient errors
//! - Bounded retry of failing handlers followed by dead-lettering with
//!   diagnostics
//! - Topic-based publish/subscribe with hierarchical (`/` separated) names
//! - An in-memory medium with lease, redelivery and dead-letter semantics
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all bus operations
//! - [`message`] - Names, envelopes and wire types
//! - [`codec`] - Envelope to wire message encoding
//! - [`client`] - Traits every queueing medium implements
//! - [`providers`] - Medium implementations
//! - [`transport`] - Send/receive on top of a medium
//! - [`pipeline`] - Retry-then-dead-letter message handling
//! - [`router`] - Topic subscriptions and publishing
//! - [`worker`] - Concurrent receive loops
//! - [`bus`] - Typed facade composing all of the above

pub mod bus;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handlers;
pub mod message;
pub mod pipeline;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod router;
pub mod serializer;
pub mod transport;
pub mod worker;

// Re-export commonly used types at crate root for convenience
pub use bus::Bus;
pub use client::{ProvisioningMode, QueueAdministration, QueueClient};
pub use codec::EnvelopeCodec;
pub use config::{DeliveryCountSource, ReceiveRetryConfig, TransportConfig};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use handlers::HandlerRegistry;
pub use message::{
    headers, Envelope, LeasedMessage, MessageId, QueueDescriptor, QueueName, Timestamp,
    TopicName, WireMessage,
};
pub use pipeline::{handler_fn, DeliveryState, MessageHandler, RetryPipeline};
pub use provider::{InMemoryConfig, MediumLimits};
pub use providers::InMemoryProvider;
pub use router::{topic_for, TopicRouter};
pub use serializer::JsonMessageSerializer;
pub use transport::{ReceivedEnvelope, Transport};
pub use worker::{WorkerPool, WorkerStats};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
