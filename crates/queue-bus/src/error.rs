//! Error types for transport, medium and pipeline operations.

use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all queue bus operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Topic not found: {topic_name}")]
    TopicNotFound { topic_name: String },

    #[error(
        "Queue '{queue_name}' does not exist and automatic queue creation is disabled; \
         create the queue up front or enable auto_create_queues"
    )]
    ProvisioningDenied { queue_name: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    SizeExceeded { size: usize, max_size: usize },

    #[error("Corrupt envelope: {message}")]
    CorruptEnvelope { message: String },

    #[error("Handler failed for message {message_id} on delivery attempt {attempt}: {message}")]
    HandlerFailure {
        message_id: String,
        attempt: u32,
        message: String,
    },

    #[error("Lease expired or not held: {lease}")]
    LeaseExpired { lease: String },

    #[error("Operation canceled")]
    OperationCanceled,

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Check if error is transient and the same medium call may be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::TopicNotFound { .. } => false,
            Self::ProvisioningDenied { .. } => false,
            Self::SizeExceeded { .. } => false,
            Self::CorruptEnvelope { .. } => false,
            Self::HandlerFailure { .. } => false,
            Self::LeaseExpired { .. } => false,
            Self::OperationCanceled => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::ProviderError { .. } => true,
            Self::SerializationError(_) => false,
            Self::ConfigurationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }

    /// Receive loops treat these as "no message this iteration"
    pub fn is_no_message(&self) -> bool {
        matches!(self, Self::LeaseExpired { .. } | Self::OperationCanceled)
    }

    /// Errors that must stop startup rather than be retried later
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProvisioningDenied { .. }
                | Self::ConfigurationError(_)
                | Self::ValidationError(_)
        )
    }
}

/// Errors during message serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Unsupported content type '{content_type}'")]
    UnsupportedContentType { content_type: String },

    #[error("Message is missing required header '{key}'")]
    MissingHeader { key: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },

    #[error("Operation '{operation}' requires an input queue but the transport is one-way")]
    OneWayClient { operation: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
