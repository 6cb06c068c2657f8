// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Publishes payloads to the main router wrapped in their delivery envelope.
//! Messages are marked persistent and carry the envelope id as message and
//! correlation id, so a consumer-side failure can always be traced back to
//! one publish call.
//!
//! Publishing is fire-and-forget on success; serialization and broker
//! failures are logged with the payload attached and returned to the caller
//! synchronously. There is no retry at publish time.

use crate::{
    envelope::{Envelope, EnvelopeMeta},
    errors::AmqpError,
    otel, topology,
};
use lapin::{
    options::BasicPublishOptions,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel,
};
use opentelemetry::Context;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tracing::error;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// AMQP delivery mode marking a message persistent
const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Publisher bound to the main router on its own channel.
pub struct Publisher {
    channel: Arc<Channel>,
    exchange: String,
}

impl Publisher {
    /// Creates a publisher targeting the main router.
    pub fn new(channel: Arc<Channel>) -> Arc<Publisher> {
        Arc::new(Publisher {
            channel,
            exchange: topology::MAIN_ROUTER.to_owned(),
        })
    }

    /// Wraps the payload in an envelope and publishes it with the given
    /// routing key. Returns the envelope metadata stamped on the message.
    pub async fn publish<T: Serialize>(
        &self,
        topic: &str,
        payload: T,
    ) -> Result<EnvelopeMeta, AmqpError> {
        let envelope = Envelope::new(payload);

        let body = serde_json::to_vec(&envelope).map_err(|err| {
            error!(
                error = err.to_string(),
                topic, "error serializing outgoing message"
            );
            AmqpError::SerializePayloadError(err.to_string())
        })?;

        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        otel::inject_context(&Context::current(), &mut headers);

        match self
            .channel
            .basic_publish(
                &self.exchange,
                topic,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &body,
                BasicProperties::default()
                    .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
                    .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
                    .with_message_id(ShortString::from(envelope.meta.id.clone()))
                    .with_correlation_id(ShortString::from(envelope.meta.id.clone()))
                    .with_headers(FieldTable::from(headers)),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    topic,
                    payload = %String::from_utf8_lossy(&body),
                    "error publishing message"
                );
                Err(AmqpError::PublishingError)
            }
            _ => Ok(envelope.meta),
        }
    }
}
