//! Transport configuration.
//!
//! [`TransportConfig`] is fixed when a transport is constructed. Every field
//! carries a serde default, so a partially specified file or environment still
//! yields a complete configuration.
//!
//! Sources for [`TransportConfig::load`] (later sources override earlier ones):
//!  1. Optional configuration file (YAML, TOML or JSON by extension)
//!  2. Environment variables prefixed `QB__` with `__` as separator,
//!     e.g. `QB__MAX_PARALLELISM=4`

use crate::error::{ConfigurationError, ValidationError};
use crate::message::QueueName;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "QB";

/// Where the retry pipeline reads the attempt number of a delivery from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryCountSource {
    /// The medium's own redelivery count; survives process restarts
    #[default]
    Medium,
    /// A side-store in this process keyed by message id; reset on restart
    InProcess,
}

/// Backoff settings for transient failures while receiving
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveRetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ReceiveRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReceiveRetryConfig {
    /// Build the backoff policy these settings describe
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_multiplier,
        )
    }
}

/// Immutable transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Input queue; `None` makes a one-way (send-only) transport
    pub input_queue: Option<String>,

    /// Create missing queues at startup instead of failing
    pub auto_create_queues: bool,

    /// Deliveries before a failing message is dead-lettered
    pub max_delivery_attempts: u32,

    /// Request medium-side partitioning for created queues
    pub partitioning_enabled: bool,

    /// Number of concurrent receive loops; 0 starts none
    pub max_parallelism: usize,

    /// Ceiling on encoded message size, applied on top of the medium's limit
    pub max_message_size: usize,

    /// How long one receive call waits for a message
    pub receive_timeout_ms: u64,

    /// Queue receiving messages that exhausted their delivery attempts
    pub error_queue: String,

    pub delivery_count_source: DeliveryCountSource,

    pub receive_retry: ReceiveRetryConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            input_queue: None,
            auto_create_queues: true,
            max_delivery_attempts: 5,
            partitioning_enabled: false,
            max_parallelism: 1,
            max_message_size: 256 * 1024, // 256KB
            receive_timeout_ms: 1_000,
            error_queue: "error".to_string(),
            delivery_count_source: DeliveryCountSource::Medium,
            receive_retry: ReceiveRetryConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Configuration for a transport receiving from `input_queue`
    pub fn new(input_queue: impl Into<String>) -> Self {
        Self {
            input_queue: Some(input_queue.into()),
            ..Default::default()
        }
    }

    /// Configuration for a send-only transport
    pub fn one_way() -> Self {
        Self::default()
    }

    /// Validated input queue name
    pub fn input_queue_name(&self) -> Result<Option<QueueName>, ValidationError> {
        self.input_queue
            .as_ref()
            .map(|name| QueueName::new(name.clone()))
            .transpose()
    }

    /// Validated error queue name
    pub fn error_queue_name(&self) -> Result<QueueName, ValidationError> {
        QueueName::new(self.error_queue.clone())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Check the configuration for values the transport cannot run with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_delivery_attempts == 0 {
            return Err(ConfigurationError::Invalid {
                message: "max_delivery_attempts must be at least 1".to_string(),
            });
        }

        if self.max_message_size == 0 {
            return Err(ConfigurationError::Invalid {
                message: "max_message_size must be greater than 0".to_string(),
            });
        }

        let input_queue = self
            .input_queue_name()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("input_queue: {}", e),
            })?;
        let error_queue = self
            .error_queue_name()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("error_queue: {}", e),
            })?;

        if input_queue.as_ref() == Some(&error_queue) {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "input_queue and error_queue must differ (both are '{}')",
                    error_queue
                ),
            });
        }

        if self.receive_retry.max_delay_ms == 0 {
            return Err(ConfigurationError::Invalid {
                message: "receive_retry.max_delay_ms must be greater than 0".to_string(),
            });
        }

        if self.receive_retry.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::Invalid {
                message: "receive_retry.backoff_multiplier must be at least 1.0".to_string(),
            });
        }

        Ok(())
    }

    /// Load configuration from an optional file layered with `QB__`
    /// environment variables, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        let transport_config: TransportConfig =
            settings
                .try_deserialize()
                .map_err(|e| ConfigurationError::Parsing {
                    message: e.to_string(),
                })?;

        transport_config.validate()?;
        Ok(transport_config)
    }
}
