// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Orchestrator
//!
//! Composes the topology, the processing pipeline and the consumer workers.
//! For each registered processor the orchestrator installs the derived
//! queue/exchange layout, persists the retry-limit metadata when a
//! management endpoint is configured, and spawns the configured number of
//! worker tasks, each on its own channel.

use crate::{
    channel::ConnectionManager,
    config::ProcessorConfig,
    consumer,
    consumer::WorkerContext,
    errors::AmqpError,
    handler::MessageHandler,
    policy::PolicyManager,
    retry::{DeathHeaderLedger, RetryLedger},
    schema::{JsonSchemaValidator, PayloadValidator},
    topology::ProcessorTopology,
};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, warn};

/// A registered processor: its configuration and handler.
struct ProcessorBinding {
    config: ProcessorConfig,
    handler: Arc<dyn MessageHandler>,
}

/// Orchestrates topology installation and consumer workers for a set of
/// processors over one shared connection.
pub struct ConsumerOrchestrator {
    connection: Arc<ConnectionManager>,
    policies: Option<Arc<PolicyManager>>,
    processors: Vec<ProcessorBinding>,
    shutdown: watch::Sender<bool>,
}

impl ConsumerOrchestrator {
    pub fn new(connection: Arc<ConnectionManager>) -> ConsumerOrchestrator {
        let (shutdown, _) = watch::channel(false);

        ConsumerOrchestrator {
            connection,
            policies: None,
            processors: vec![],
            shutdown,
        }
    }

    /// Enables the management-API-backed policy and metadata features.
    pub fn policies(mut self, policies: Arc<PolicyManager>) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Registers a processor and its handler.
    pub fn register(mut self, config: ProcessorConfig, handler: Arc<dyn MessageHandler>) -> Self {
        self.processors.push(ProcessorBinding { config, handler });
        self
    }

    /// Installs every processor's topology and spawns its workers, returning
    /// the worker task handles.
    pub async fn start(&self) -> Result<Vec<JoinHandle<Result<(), AmqpError>>>, AmqpError> {
        if let Some(policies) = &self.policies {
            policies.initialize().await;
        }

        let mut workers = vec![];
        for processor in &self.processors {
            workers.extend(self.create_consumer(processor).await?);
        }

        Ok(workers)
    }

    /// Starts all workers and blocks until they finish. The first worker
    /// failure is returned.
    pub async fn consume_blocking(&self) -> Result<(), AmqpError> {
        let workers = self.start().await?;

        for joined in join_all(workers).await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(err) => {
                    error!(error = err.to_string(), "worker task failed");
                    return Err(AmqpError::InternalError);
                }
            }
        }

        Ok(())
    }

    /// Signals all workers to stop taking new deliveries. In-flight messages
    /// finish their pipeline before the worker channels close.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn create_consumer(
        &self,
        processor: &ProcessorBinding,
    ) -> Result<Vec<JoinHandle<Result<(), AmqpError>>>, AmqpError> {
        let config = &processor.config;
        let topology = ProcessorTopology::plan(config);

        debug!(processor = config.name.as_str(), "installing topology");
        let channel = self.connection.create_channel().await?;
        topology
            .install(channel, self.policies.as_deref())
            .await?;

        match &self.policies {
            Some(policies) if policies.is_available() => {
                policies
                    .apply_metadata(&topology.names.main_queue, config.max_attempts)
                    .await;
            }
            _ => warn!(
                processor = config.name.as_str(),
                "management api unavailable, skipping queue metadata"
            ),
        }

        let validator: Option<Arc<dyn PayloadValidator>> = match &config.schema {
            Some(schema) => Some(Arc::new(JsonSchemaValidator::for_message_schema(schema)?)),
            None => None,
        };
        let ledger: Arc<dyn RetryLedger> = Arc::new(DeathHeaderLedger);

        let mut handles = vec![];
        for index in 0..config.consumers_count.max(1) {
            let channel = self.connection.create_channel().await?;

            let ctx = WorkerContext {
                consumer_tag: format!("{}-{}", config.name, index),
                names: topology.names.clone(),
                handler: processor.handler.clone(),
                validator: validator.clone(),
                ledger: ledger.clone(),
                max_attempts: config.max_attempts as u64,
            };

            handles.push(tokio::spawn(consumer::run(
                channel,
                ctx,
                self.shutdown.subscribe(),
            )));
        }

        debug!(
            processor = config.name.as_str(),
            workers = handles.len(),
            "consumers started"
        );

        Ok(handles)
    }
}
