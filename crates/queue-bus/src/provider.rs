//! Medium limits and provider configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size limits imposed by a queueing medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediumLimits {
    /// Maximum encoded message size (slots, properties and body)
    pub max_message_size: usize,
    /// Maximum size of a single property key or value
    pub max_property_value_size: usize,
    /// Maximum total size of all properties on one message
    pub max_properties_size: usize,
    /// Deliveries after which the medium dead-letters a message on its own;
    /// `None` when the medium redelivers without bound
    pub max_delivery_count: Option<u32>,
}

impl Default for MediumLimits {
    fn default() -> Self {
        Self {
            max_message_size: 256 * 1024,       // 256KB
            max_property_value_size: 32 * 1024, // 32KB
            max_properties_size: 64 * 1024,     // 64KB
            max_delivery_count: None,
        }
    }
}

impl MediumLimits {
    /// Tighten the message size ceiling; never loosens the medium's own limit
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = self.max_message_size.min(max_message_size);
        self
    }

    pub fn with_max_delivery_count(mut self, max_delivery_count: Option<u32>) -> Self {
        self.max_delivery_count = max_delivery_count;
        self
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Maximum number of messages a queue may hold
    pub max_queue_size: usize,
    /// How long a received message stays invisible to other receivers
    pub lease_duration: Duration,
    /// Deliveries after which the medium dead-letters on its own
    pub max_delivery_count: Option<u32>,
    /// Upper bound between checks for expired leases while waiting
    pub poll_interval: Duration,
    pub limits: MediumLimits,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            lease_duration: Duration::from_secs(60),
            max_delivery_count: Some(10),
            poll_interval: Duration::from_millis(50),
            limits: MediumLimits::default(),
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
