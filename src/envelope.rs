// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Envelope
//!
//! The wire format for message bodies. Every published payload is wrapped in
//! an envelope carrying delivery metadata:
//!
//! ```json
//! {"message": <payload>, "meta": {"id": "<uuid>", "publishedAt": 1716400000000}}
//! ```
//!
//! Decoding is strict: an empty body, a non-JSON body and a structurally
//! invalid envelope are three distinct error kinds, and a partially built
//! envelope is never returned.

use crate::errors::AmqpError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Delivery metadata attached to every published message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    /// Unique id, generated per publish call.
    pub id: String,
    /// Publish time as epoch milliseconds.
    #[serde(rename = "publishedAt")]
    pub published_at: i64,
}

/// A payload wrapped with its delivery metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T = Value> {
    pub message: T,
    pub meta: EnvelopeMeta,
}

impl<T> Envelope<T> {
    /// Wraps a payload with a fresh id and the current timestamp.
    pub fn new(message: T) -> Envelope<T> {
        Envelope {
            message,
            meta: EnvelopeMeta {
                id: Uuid::new_v4().to_string(),
                published_at: Utc::now().timestamp_millis(),
            },
        }
    }
}

/// Decodes a message body into an envelope.
///
/// Returns both the raw JSON document (the schema validator runs against it,
/// so violation paths are rooted at the envelope) and the typed envelope.
///
/// # Errors
/// * `EmptyBodyError` - the body has no bytes
/// * `DeserializationError` - the body is not valid JSON
/// * `InvalidEnvelopeError` - the JSON is not a well-formed envelope
pub fn decode_envelope(body: &[u8]) -> Result<(Value, Envelope), AmqpError> {
    if body.is_empty() {
        return Err(AmqpError::EmptyBodyError);
    }

    let raw: Value = serde_json::from_slice(body)
        .map_err(|err| AmqpError::DeserializationError(err.to_string()))?;

    let envelope: Envelope = serde_json::from_value(raw.clone())
        .map_err(|err| AmqpError::InvalidEnvelopeError(err.to_string()))?;

    Ok((raw, envelope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_preserves_payload() {
        let payload = json!({"field1": "value", "nested": {"n": 42}});
        let envelope = Envelope::new(payload.clone());
        let body = serde_json::to_vec(&envelope).unwrap();

        let (_, decoded) = decode_envelope(&body).unwrap();

        assert_eq!(decoded.message, payload);
        assert_eq!(decoded.meta, envelope.meta);
    }

    #[test]
    fn ids_are_unique_per_envelope() {
        let first = Envelope::new(json!(1));
        let second = Envelope::new(json!(1));
        assert_ne!(first.meta.id, second.meta.id);
    }

    #[test]
    fn published_at_is_non_decreasing() {
        let first = Envelope::new(json!(1));
        let second = Envelope::new(json!(2));
        assert!(second.meta.published_at >= first.meta.published_at);
    }

    #[test]
    fn empty_body_is_rejected() {
        assert_eq!(decode_envelope(b"").unwrap_err(), AmqpError::EmptyBodyError);
    }

    #[test]
    fn non_json_body_is_rejected() {
        let err = decode_envelope(b"not json at all").unwrap_err();
        assert!(matches!(err, AmqpError::DeserializationError(_)));
    }

    #[test]
    fn missing_meta_is_rejected() {
        let body = serde_json::to_vec(&json!({"message": {"a": 1}})).unwrap();
        let err = decode_envelope(&body).unwrap_err();
        assert!(matches!(err, AmqpError::InvalidEnvelopeError(_)));
    }

    #[test]
    fn mistyped_meta_fields_are_rejected() {
        let body = serde_json::to_vec(&json!({
            "message": {"a": 1},
            "meta": {"id": 42, "publishedAt": "yesterday"},
        }))
        .unwrap();
        let err = decode_envelope(&body).unwrap_err();
        assert!(matches!(err, AmqpError::InvalidEnvelopeError(_)));
    }
}
