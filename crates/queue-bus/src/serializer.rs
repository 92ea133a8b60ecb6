//! JSON serialization of typed messages into envelopes.

use crate::error::{QueueError, SerializationError};
use crate::message::{headers, Envelope};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

#[cfg(test)]
#[path = "serializer_tests.rs"]
mod tests;

/// Content type written on every serialized message
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// Name identifying a message type in the message type header
pub fn message_type_name<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
}

/// Serializes typed messages as UTF-8 JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMessageSerializer;

impl JsonMessageSerializer {
    pub fn new() -> Self {
        Self
    }

    /// Serialize `message` into an envelope carrying content type and
    /// message type headers
    pub fn serialize<T: Serialize>(&self, message: &T) -> Result<Envelope, QueueError> {
        let body = serde_json::to_vec(message).map_err(SerializationError::from)?;

        Ok(Envelope::new(Bytes::from(body))
            .with_header(headers::CONTENT_TYPE, JSON_CONTENT_TYPE)
            .with_header(headers::MESSAGE_TYPE, message_type_name::<T>()))
    }

    /// Deserialize the body of `envelope`.
    ///
    /// An envelope without content type is read as JSON.
    pub fn deserialize<T: DeserializeOwned>(&self, envelope: &Envelope) -> Result<T, QueueError> {
        if let Some(content_type) = envelope.header(headers::CONTENT_TYPE) {
            if !is_json(content_type) {
                return Err(SerializationError::UnsupportedContentType {
                    content_type: content_type.to_string(),
                }
                .into());
            }
        }

        let message = serde_json::from_slice(&envelope.body).map_err(SerializationError::from)?;
        Ok(message)
    }
}

fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|media_type| media_type.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}
