// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Worker
//!
//! The per-worker consume loop. Each worker owns its channel, sets a fixed
//! prefetch and pulls deliveries until shut down; every delivery is wrapped
//! into an inbound message and pushed through a fresh processing pipeline.
//!
//! Shutdown is cooperative: the worker stops taking new deliveries but an
//! in-flight message always finishes its pipeline (reaching ack or nack)
//! before the channel is closed. The one error that stops a worker early is
//! the fatal ack-after-dead-letter failure, which must reach the supervisor.

use crate::{
    errors::AmqpError,
    handler::MessageHandler,
    message::InboundMessage,
    otel,
    retry::RetryLedger,
    schema::PayloadValidator,
    stages::standard_pipeline,
    topology::TopologyNames,
};
use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Channel,
};
use opentelemetry::{
    global,
    global::BoxedTracer,
    trace::{Span, Status},
};
use std::{borrow::Cow, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Unacknowledged deliveries one worker channel may hold.
pub(crate) const CONSUMER_PREFETCH: u16 = 1;

/// Everything one worker needs to process deliveries for its processor.
pub(crate) struct WorkerContext {
    pub(crate) consumer_tag: String,
    pub(crate) names: TopologyNames,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) validator: Option<Arc<dyn PayloadValidator>>,
    pub(crate) ledger: Arc<dyn RetryLedger>,
    pub(crate) max_attempts: u64,
}

/// Runs one consume loop until shutdown, the stream ending, or a fatal
/// error.
pub(crate) async fn run(
    channel: Arc<Channel>,
    ctx: WorkerContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), AmqpError> {
    let queue = ctx.names.main_queue.clone();

    if let Err(err) = channel
        .basic_qos(CONSUMER_PREFETCH, BasicQosOptions::default())
        .await
    {
        error!(error = err.to_string(), "error to configure qos");
        return Err(AmqpError::QoSDeclarationError(queue));
    }

    let mut consumer = match channel
        .basic_consume(
            &queue,
            &ctx.consumer_tag,
            BasicConsumeOptions {
                no_local: false,
                no_ack: false,
                exclusive: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
    {
        Ok(consumer) => consumer,
        Err(err) => {
            error!(error = err.to_string(), "error to create the consumer");
            return Err(AmqpError::ConsumerError(ctx.consumer_tag.clone()));
        }
    };

    debug!(
        consumer = ctx.consumer_tag.as_str(),
        queue = queue.as_str(),
        "consumer started, waiting for messages"
    );

    let tracer = global::tracer("amqp consumer");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!(consumer = ctx.consumer_tag.as_str(), "shutdown requested");
                break;
            }
            next = consumer.next() => {
                let Some(result) = next else { break };

                match result {
                    Ok(delivery) => {
                        if let Err(err) = handle_delivery(&tracer, delivery, &channel, &ctx).await {
                            if err.is_fatal() {
                                error!(
                                    error = err.to_string(),
                                    consumer = ctx.consumer_tag.as_str(),
                                    "fatal error, stopping worker"
                                );
                                return Err(err);
                            }
                            error!(error = err.to_string(), "error consume msg");
                        }
                    }
                    Err(err) => error!(error = err.to_string(), "errors consume msg"),
                }
            }
        }
    }

    if let Err(err) = channel.close(200, "consumer stopped").await {
        warn!(error = err.to_string(), "error to close the channel");
    }

    Ok(())
}

/// Processes a single delivery through a fresh pipeline, recording the
/// outcome on a consumer span.
async fn handle_delivery(
    tracer: &BoxedTracer,
    delivery: Delivery,
    channel: &Arc<Channel>,
    ctx: &WorkerContext,
) -> Result<(), AmqpError> {
    let message = InboundMessage::from_delivery(delivery, channel.clone(), &ctx.names.main_queue);

    let (_, mut span) = otel::consumer_span(&message.properties, tracer, &ctx.names.main_queue);

    debug!(
        exchange = message.exchange.as_str(),
        routing_key = message.routing_key.as_str(),
        "received delivery"
    );

    let pipeline = standard_pipeline(
        ctx.handler.clone(),
        ctx.validator.clone(),
        ctx.ledger.clone(),
        ctx.max_attempts,
        &ctx.names,
    );

    match pipeline.consume(&message).await {
        Ok(_) => {
            span.set_status(Status::Ok);
            Ok(())
        }
        Err(err) => {
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from(err.to_string()),
            });
            Err(err)
        }
    }
}
