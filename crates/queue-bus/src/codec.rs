//! Envelope codec mapping logical envelopes onto the medium's wire format.
//!
//! Well-known headers travel in the medium's native slots (message id,
//! content type, correlation id). Remaining headers become medium properties
//! when they fit the medium's property limits. When they do not, all remaining
//! headers are written into a JSON header block inside the payload, flagged by
//! [`HEADER_BLOCK_PROPERTY`], so large diagnostics never get truncated.

use crate::error::{QueueError, SerializationError};
use crate::message::{headers, properties_size, Envelope, WireMessage};
use crate::provider::MediumLimits;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;

/// Property marking a payload that carries a header block
pub const HEADER_BLOCK_PROPERTY: &str = "qb-header-block";

const HEADER_BLOCK_VERSION: &str = "1";

#[derive(Serialize, Deserialize)]
struct HeaderBlock {
    headers: BTreeMap<String, String>,
    #[serde(with = "bytes_serde")]
    body: Bytes,
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

/// Encodes envelopes to wire messages and back
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec {
    limits: MediumLimits,
}

impl EnvelopeCodec {
    /// Create codec enforcing the given medium limits
    pub fn new(limits: MediumLimits) -> Self {
        Self { limits }
    }

    /// Limits this codec enforces
    pub fn limits(&self) -> &MediumLimits {
        &self.limits
    }

    /// Encode an envelope for the medium.
    ///
    /// The size limit applies to the encoded form. When headers spill into
    /// the header block the body is stored base64 encoded, which grows it by
    /// about a third, so a body that fits next to small headers can exceed
    /// the limit next to large ones.
    ///
    /// # Errors
    ///
    /// Returns `SizeExceeded` when the encoded message is larger than the
    /// medium's maximum message size.
    pub fn encode(&self, envelope: &Envelope) -> Result<WireMessage, QueueError> {
        let mut wire = WireMessage::default();
        let mut remaining = BTreeMap::new();

        for (key, value) in &envelope.headers {
            match key.as_str() {
                headers::MESSAGE_ID => wire.message_id = Some(value.clone()),
                headers::CONTENT_TYPE => wire.content_type = Some(value.clone()),
                headers::CORRELATION_ID => wire.correlation_id = Some(value.clone()),
                _ => {
                    remaining.insert(key.clone(), value.clone());
                }
            }
        }

        if self.fits_in_properties(&remaining) {
            wire.properties = remaining.into_iter().collect();
            wire.body = envelope.body.clone();
        } else {
            let block = HeaderBlock {
                headers: remaining,
                body: envelope.body.clone(),
            };
            let encoded = serde_json::to_vec(&block).map_err(SerializationError::from)?;
            wire.properties.insert(
                HEADER_BLOCK_PROPERTY.to_string(),
                HEADER_BLOCK_VERSION.to_string(),
            );
            wire.body = Bytes::from(encoded);
        }

        let size = wire.encoded_size();
        if size > self.limits.max_message_size {
            return Err(QueueError::SizeExceeded {
                size,
                max_size: self.limits.max_message_size,
            });
        }

        Ok(wire)
    }

    /// Decode a wire message back into the envelope it was encoded from.
    ///
    /// # Errors
    ///
    /// Returns `CorruptEnvelope` when the header block cannot be read.
    pub fn decode(&self, wire: &WireMessage) -> Result<Envelope, QueueError> {
        let mut decoded_headers: HashMap<String, String> = wire
            .properties
            .iter()
            .filter(|(key, _)| key.as_str() != HEADER_BLOCK_PROPERTY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let body = match wire.properties.get(HEADER_BLOCK_PROPERTY) {
            Some(version) if version == HEADER_BLOCK_VERSION => {
                let block: HeaderBlock =
                    serde_json::from_slice(&wire.body).map_err(|e| QueueError::CorruptEnvelope {
                        message: format!("unreadable header block: {}", e),
                    })?;
                decoded_headers.extend(block.headers);
                block.body
            }
            Some(version) => {
                return Err(QueueError::CorruptEnvelope {
                    message: format!("unsupported header block version '{}'", version),
                });
            }
            None => wire.body.clone(),
        };

        let slots = [
            (headers::MESSAGE_ID, &wire.message_id),
            (headers::CONTENT_TYPE, &wire.content_type),
            (headers::CORRELATION_ID, &wire.correlation_id),
        ];
        for (key, slot) in slots {
            if let Some(value) = slot {
                decoded_headers.insert(key.to_string(), value.clone());
            }
        }

        Ok(Envelope {
            headers: decoded_headers,
            body,
        })
    }

    fn fits_in_properties(&self, properties: &BTreeMap<String, String>) -> bool {
        // The marker key must never appear as a plain property.
        if properties.contains_key(HEADER_BLOCK_PROPERTY) {
            return false;
        }

        let each_fits = properties.iter().all(|(key, value)| {
            key.len() <= self.limits.max_property_value_size
                && value.len() <= self.limits.max_property_value_size
        });

        each_fits && properties_size(properties) <= self.limits.max_properties_size
    }
}
