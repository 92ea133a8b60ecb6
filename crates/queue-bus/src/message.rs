//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

const MAX_ENTITY_NAME_LENGTH: usize = 260;

/// Validate a queue or topic name.
///
/// Names may contain `/` to express hierarchical namespaces, e.g.
/// `department/subdepartment/orders`. Every segment must be non-empty and
/// consist of ASCII alphanumerics, `-`, `_` or `.`.
fn validate_entity_name(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > MAX_ENTITY_NAME_LENGTH {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: format!("must be 1-{} characters", MAX_ENTITY_NAME_LENGTH),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "only ASCII alphanumeric, '-', '_', '.' and '/' allowed".to_string(),
        });
    }

    if name.split('/').any(|segment| segment.is_empty()) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "path segments must not be empty".to_string(),
        });
    }

    Ok(())
}

/// Validated queue name, accepted verbatim (no case folding)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        validate_entity_name("queue_name", &name)?;
        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments of a hierarchical name
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Validated topic name; same naming rules as queues
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicName(String);

impl TopicName {
    /// Create new topic name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        validate_entity_name("topic_name", &name)?;
        Ok(Self(name))
    }

    /// Get topic name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TopicName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Unique identifier for messages within the queue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Timestamp offset into the future
    pub fn after(duration: std::time::Duration) -> Self {
        let now = Utc::now();
        let later = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|offset| now.checked_add_signed(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self(later)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Reserved header keys
pub mod headers {
    /// Logical message identity, mapped to the medium's native message id slot
    pub const MESSAGE_ID: &str = "qb-msg-id";

    /// Body content type, mapped to the medium's native content type slot
    pub const CONTENT_TYPE: &str = "qb-content-type";

    /// Correlation id, mapped to the medium's native correlation slot
    pub const CORRELATION_ID: &str = "qb-corr-id";

    /// Type name of a serialized message
    pub const MESSAGE_TYPE: &str = "qb-msg-type";

    /// Human-readable failure diagnostics on dead-lettered messages
    pub const ERROR_DETAILS: &str = "qb-error-details";

    /// Queue a dead-lettered message failed in
    pub const SOURCE_QUEUE: &str = "qb-source-queue";

    /// RFC 3339 time the message was handed to the transport
    pub const SENT_TIME: &str = "qb-sent-time";
}

/// Logical message unit exchanged between senders and receivers.
///
/// Header keys are unique. The body is opaque to the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Envelope {
    /// Create envelope with body and no headers
    pub fn new(body: Bytes) -> Self {
        Self {
            headers: HashMap::new(),
            body,
        }
    }

    /// Add or replace a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Look up a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Message id header, if assigned
    pub fn message_id(&self) -> Option<&str> {
        self.header(headers::MESSAGE_ID)
    }
}

impl From<(HashMap<String, String>, Bytes)> for Envelope {
    fn from(value: (HashMap<String, String>, Bytes)) -> Self {
        Self {
            headers: value.0,
            body: value.1,
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Medium representation of an envelope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireMessage {
    pub message_id: Option<String>,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub properties: HashMap<String, String>,
    pub body: Bytes,
}

impl WireMessage {
    /// Create wire message with body only
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    /// Bytes counted against the medium's maximum message size
    pub fn encoded_size(&self) -> usize {
        let slots = [&self.message_id, &self.content_type, &self.correlation_id]
            .iter()
            .filter_map(|slot| slot.as_ref())
            .map(String::len)
            .sum::<usize>();

        slots + properties_size(&self.properties) + self.body.len()
    }
}

/// Total key and value bytes of a property map
pub(crate) fn properties_size<'a, I>(properties: I) -> usize
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    properties
        .into_iter()
        .map(|(key, value)| key.len() + value.len())
        .sum()
}

/// Opaque token proving the holder owns a message lease
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    /// Generate new lease token
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get token as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LeaseToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message received under an exclusive, time-bounded lease
#[derive(Debug, Clone)]
pub struct LeasedMessage {
    pub message_id: MessageId,
    pub queue: QueueName,
    pub message: WireMessage,
    pub lease: LeaseToken,
    pub lease_expires_at: Timestamp,
    /// Number of times the medium has delivered this message, starting at 1
    pub delivery_count: u32,
    pub enqueued_at: Timestamp,
}

impl LeasedMessage {
    /// Check if the lease has run out
    pub fn is_lease_expired(&self) -> bool {
        Timestamp::now() >= self.lease_expires_at
    }
}

/// Message moved to a queue's dead-letter sub-queue by the medium
#[derive(Debug, Clone)]
pub struct DeadLetteredMessage {
    pub message_id: MessageId,
    pub message: WireMessage,
    pub reason: String,
    pub delivery_count: u32,
    pub dead_lettered_at: Timestamp,
}

/// Queue provisioning description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDescriptor {
    pub name: QueueName,
    pub partitioning_enabled: bool,
}

impl QueueDescriptor {
    /// Create descriptor with partitioning disabled
    pub fn new(name: QueueName) -> Self {
        Self {
            name,
            partitioning_enabled: false,
        }
    }

    /// Toggle medium-side partitioning
    pub fn with_partitioning(mut self, enabled: bool) -> Self {
        self.partitioning_enabled = enabled;
        self
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
