// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Inbound Message
//!
//! One delivered message, owned by exactly one pipeline invocation. The
//! message carries the raw body, the AMQP properties (including the broker's
//! death-history header) and a handle to the owning channel for ack, nack
//! and republish operations.
//!
//! The broker operations sit behind the `MessageHandle` trait so the
//! pipeline stages can be exercised without a running broker.

use crate::errors::AmqpError;
use async_trait::async_trait;
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions, BasicPublishOptions},
    BasicProperties, Channel,
};
use std::sync::Arc;
use tracing::error;

/// Broker operations available for one delivered message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandle: Send + Sync {
    /// Acknowledges the delivery.
    async fn ack(&self) -> Result<(), AmqpError>;

    /// Negative-acknowledges the delivery.
    async fn nack(&self, requeue: bool) -> Result<(), AmqpError>;

    /// Publishes the message body and properties to another destination.
    async fn republish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;
}

/// `MessageHandle` backed by a lapin delivery and its channel.
pub struct LapinMessageHandle {
    acker: Acker,
    channel: Arc<Channel>,
}

#[async_trait]
impl MessageHandle for LapinMessageHandle {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }

    async fn republish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error whiling republish msg");
                Err(AmqpError::PublishingError)
            }
            _ => Ok(()),
        }
    }
}

/// A delivered message plus its broker handle.
pub struct InboundMessage {
    pub body: Vec<u8>,
    pub properties: BasicProperties,
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    /// The queue this message was consumed from.
    pub queue: String,
    handle: Arc<dyn MessageHandle>,
}

impl InboundMessage {
    /// Creates a message from raw parts. Mostly useful for alternate
    /// transports and tests; consumers use [`InboundMessage::from_delivery`].
    pub fn new(
        body: Vec<u8>,
        properties: BasicProperties,
        exchange: String,
        routing_key: String,
        delivery_tag: u64,
        queue: String,
        handle: Arc<dyn MessageHandle>,
    ) -> InboundMessage {
        InboundMessage {
            body,
            properties,
            exchange,
            routing_key,
            delivery_tag,
            queue,
            handle,
        }
    }

    /// Wraps a lapin delivery, taking ownership of its acker.
    pub fn from_delivery(delivery: Delivery, channel: Arc<Channel>, queue: &str) -> InboundMessage {
        let handle = Arc::new(LapinMessageHandle {
            acker: delivery.acker,
            channel,
        });

        InboundMessage {
            body: delivery.data,
            properties: delivery.properties,
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            delivery_tag: delivery.delivery_tag,
            queue: queue.to_owned(),
            handle,
        }
    }

    /// Acknowledges the delivery.
    pub async fn ack(&self) -> Result<(), AmqpError> {
        self.handle.ack().await
    }

    /// Rejects the delivery without requeueing, letting the broker route it
    /// through the queue's dead-letter exchange.
    pub async fn reject(&self) -> Result<(), AmqpError> {
        self.handle.nack(false).await
    }

    /// Republishes the original body and properties to another destination.
    pub async fn republish(&self, exchange: &str, routing_key: &str) -> Result<(), AmqpError> {
        self.handle
            .republish(exchange, routing_key, &self.body, self.properties.clone())
            .await
    }
}
