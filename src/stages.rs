// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Standard Pipeline Stages
//!
//! The stages making up the standard processing chain, outermost to
//! innermost:
//!
//! `ExceptionLogger → SucceededAcknowledger → FailedRejecter →
//! RetriesChecker → FailureLogger → BaseHandler`
//!
//! On handler success the message is acknowledged. On failure the retries
//! checker consults the retry ledger: below the attempt limit the error is
//! rethrown and the rejecter nacks the message without requeueing, which
//! sends it through the main queue's dead-letter exchange into the retry
//! queue until its TTL expires and the broker redelivers it. At the limit
//! the original body and headers are republished to the dead-letter queue
//! and the delivery is acknowledged.

use crate::{
    envelope::decode_envelope,
    errors::AmqpError,
    handler::{MessageHandler, ReceivedMessage},
    message::InboundMessage,
    pipeline::{Next, Pipeline, PipelineStage, StageResult},
    retry::RetryLedger,
    schema::PayloadValidator,
    topology::{TopologyNames, MAIN_ROUTER},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Assembles the standard chain for one delivery.
pub fn standard_pipeline(
    handler: Arc<dyn MessageHandler>,
    validator: Option<Arc<dyn PayloadValidator>>,
    ledger: Arc<dyn RetryLedger>,
    max_attempts: u64,
    names: &TopologyNames,
) -> Pipeline {
    Pipeline::builder()
        .stage(Arc::new(ExceptionLogger))
        .stage(Arc::new(SucceededAcknowledger))
        .stage(Arc::new(FailedRejecter))
        .stage(Arc::new(RetriesChecker {
            ledger,
            max_attempts,
            dead_letter_exchange: MAIN_ROUTER.to_owned(),
            dead_letter_routing_key: names.dead_letter_queue.clone(),
        }))
        .stage(Arc::new(FailureLogger))
        .stage(Arc::new(BaseHandler { handler, validator }))
        .build()
}

/// Innermost stage: decodes the envelope, validates the payload against the
/// configured schema and invokes the user handler.
pub struct BaseHandler {
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) validator: Option<Arc<dyn PayloadValidator>>,
}

#[async_trait]
impl PipelineStage for BaseHandler {
    async fn consume(&self, message: &InboundMessage, _next: Next<'_>) -> StageResult {
        let (raw, envelope) = decode_envelope(&message.body)?;

        if let Some(validator) = &self.validator {
            validator
                .validate(&raw)
                .map_err(|violations| AmqpError::SchemaValidationError { violations })?;
        }

        let received = ReceivedMessage {
            payload: envelope.message,
            meta: envelope.meta,
            queue: message.queue.clone(),
        };

        self.handler
            .handle(&received)
            .await
            .map_err(|err| AmqpError::ProcessingError(err.to_string()))?;

        Ok(true)
    }
}

/// Logs every failure coming out of the handler with the payload attached,
/// then rethrows unchanged.
pub struct FailureLogger;

#[async_trait]
impl PipelineStage for FailureLogger {
    async fn consume(&self, message: &InboundMessage, next: Next<'_>) -> StageResult {
        match next.run(message).await {
            Err(err) => {
                error!(
                    queue = message.queue.as_str(),
                    payload = %String::from_utf8_lossy(&message.body),
                    error = err.to_string(),
                    detail = ?err,
                    "failure processing message"
                );
                Err(err)
            }
            ok => ok,
        }
    }
}

/// Decides between broker-native retry and dead-lettering.
pub struct RetriesChecker {
    pub(crate) ledger: Arc<dyn RetryLedger>,
    pub(crate) max_attempts: u64,
    pub(crate) dead_letter_exchange: String,
    pub(crate) dead_letter_routing_key: String,
}

#[async_trait]
impl PipelineStage for RetriesChecker {
    async fn consume(&self, message: &InboundMessage, next: Next<'_>) -> StageResult {
        let err = match next.run(message).await {
            Err(err) => err,
            ok => return ok,
        };

        let attempts = self.ledger.attempts(message);
        if attempts < self.max_attempts {
            warn!(
                attempts,
                max_attempts = self.max_attempts,
                "error whiling handling msg, requeuing for later"
            );
            return Err(err);
        }

        error!(
            attempts,
            max_attempts = self.max_attempts,
            queue = message.queue.as_str(),
            payload = %String::from_utf8_lossy(&message.body),
            error = err.to_string(),
            "too many attempts, sending message to the dead letter queue"
        );

        message
            .republish(&self.dead_letter_exchange, &self.dead_letter_routing_key)
            .await
            .map_err(|_| AmqpError::PublishingToDeadLetterError)?;

        if let Err(ack_err) = message.ack().await {
            error!(
                error = ack_err.to_string(),
                "error whiling ack msg after dead lettering"
            );
            return Err(AmqpError::AckAfterDeadLetterError);
        }

        Ok(false)
    }
}

/// Rejects any remaining failure without requeueing so the broker routes the
/// message into the retry cycle. Fatal errors pass through untouched.
pub struct FailedRejecter;

#[async_trait]
impl PipelineStage for FailedRejecter {
    async fn consume(&self, message: &InboundMessage, next: Next<'_>) -> StageResult {
        match next.run(message).await {
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                debug!(
                    error = err.to_string(),
                    "rejecting message for broker-side retry"
                );
                message.reject().await?;
                Ok(false)
            }
            ok => ok,
        }
    }
}

/// Acknowledges a successfully processed message. A failure already handled
/// downstream needs no acknowledgement here.
pub struct SucceededAcknowledger;

#[async_trait]
impl PipelineStage for SucceededAcknowledger {
    async fn consume(&self, message: &InboundMessage, next: Next<'_>) -> StageResult {
        match next.run(message).await {
            Ok(true) => {
                debug!("message successfully processed");
                message.ack().await?;
                Ok(true)
            }
            other => other,
        }
    }
}

/// Outermost stage: logs anything that still escapes the chain, then
/// rethrows. Never swallows.
pub struct ExceptionLogger;

#[async_trait]
impl PipelineStage for ExceptionLogger {
    async fn consume(&self, message: &InboundMessage, next: Next<'_>) -> StageResult {
        match next.run(message).await {
            Err(err) => {
                error!(
                    queue = message.queue.as_str(),
                    error = err.to_string(),
                    "unhandled error escaped the processing pipeline"
                );
                Err(err)
            }
            ok => ok,
        }
    }
}
