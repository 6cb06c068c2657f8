// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Handler
//!
//! The user-facing callback invoked for every successfully decoded message.
//! A handler only sees the payload and its delivery metadata; acknowledgement,
//! rejection and dead-lettering are decided by the processing pipeline.

use crate::envelope::EnvelopeMeta;
use async_trait::async_trait;
use serde_json::Value;

/// Error type returned by user handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A decoded message as seen by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// The payload, already unwrapped from its envelope.
    pub payload: Value,
    /// Delivery metadata stamped at publish time.
    pub meta: EnvelopeMeta,
    /// The queue the message was consumed from.
    pub queue: String,
}

/// Processes one decoded message.
///
/// Returning an error triggers the retry cycle; once the message has
/// exhausted its attempts it is dead-lettered instead.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &ReceivedMessage) -> Result<(), HandlerError>;
}
