// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP Reliability Layer
//!
//! This module provides the error taxonomy for topology, consuming, publishing
//! and policy operations. The `AmqpError` enum covers broker communication
//! failures as well as the message-level failures (deserialization, schema
//! validation, handler errors) the processing pipeline turns into retry or
//! dead-letter decisions.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// A single schema-validation failure for one location in the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// JSON pointer to the offending value, e.g. `/message/field1`.
    pub path: String,
    /// The schema keyword that was violated, e.g. `type` or `required`.
    pub rule: String,
    /// Human-readable description of the failure.
    pub message: String,
    /// The offending value itself.
    pub value: Value,
}

/// Represents errors that can occur during AMQP operations.
///
/// Connection and topology variants are fatal at startup or processor
/// registration. Deserialization, schema-validation and processing variants
/// are resolved inside the processing pipeline. `AckAfterDeadLetterError` is
/// the one pipeline error that must always escalate: the message may already
/// be duplicated, so no local retry is allowed.
#[derive(Error, Debug, PartialEq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Connection attempts to the broker were exhausted
    #[error("failure to connect after `{0}` attempts")]
    ConnectionError(usize),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingError(String, String),

    /// A broker-side TTL policy was required but could not be applied
    #[error("ttl policy undefined for queue `{0}`")]
    TtlPolicyError(String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos for queue `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer
    #[error("failure to start consumer `{0}`")]
    ConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error serializing an outgoing payload
    #[error("failure to serialize payload: `{0}`")]
    SerializePayloadError(String),

    /// The message body was empty
    #[error("empty message body")]
    EmptyBodyError,

    /// The message body was not valid JSON
    #[error("failure to parse message body: `{0}`")]
    DeserializationError(String),

    /// The message body was valid JSON but not a valid envelope
    #[error("invalid message envelope: `{0}`")]
    InvalidEnvelopeError(String),

    /// The configured message schema could not be compiled
    #[error("invalid message schema: `{0}`")]
    InvalidSchemaError(String),

    /// The payload failed validation against the configured schema
    #[error("payload failed schema validation")]
    SchemaValidationError { violations: Vec<Violation> },

    /// The user handler returned an error
    #[error("failure processing message: `{0}`")]
    ProcessingError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error publishing a message to the dead letter queue
    #[error("failure to publish to the dead letter queue")]
    PublishingToDeadLetterError,

    /// The message was published to the dead letter queue but the following
    /// acknowledge failed, so the message may now exist twice
    #[error("failure to ack message after dead lettering, message may be duplicated")]
    AckAfterDeadLetterError,
}

impl AmqpError {
    /// Whether this error must escalate out of the processing pipeline
    /// instead of being converted into a reject.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AmqpError::AckAfterDeadLetterError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ack_after_dead_letter_is_fatal() {
        assert!(AmqpError::AckAfterDeadLetterError.is_fatal());
        assert!(!AmqpError::NackMessageError.is_fatal());
        assert!(!AmqpError::ProcessingError("boom".to_owned()).is_fatal());
        assert!(!AmqpError::SchemaValidationError { violations: vec![] }.is_fatal());
    }
}
