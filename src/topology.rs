// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Management
//!
//! Derivation and installation of the per-processor queue/exchange layout
//! that encodes the retry and dead-letter cycle:
//!
//! - main queue `name`, dead-lettering rejected messages to the dead router
//! - retry queue `retry-name`, holding them for the configured delay and
//!   dead-lettering them back through the main router on expiry
//! - dead-letter queue `dlq-name`, the terminal resting place, itself wired
//!   back to the main router so messages can be re-driven manually
//!
//! All names are derived deterministically from the processor name.
//! Installing the same topology twice with identical arguments is a no-op
//! on the broker.

use crate::{
    config::ProcessorConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    policy::PolicyManager,
    queue::{QueueBinding, QueueDefinition},
};
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Exchange all application publishes go through.
pub const MAIN_ROUTER: &str = "main-router";
/// Exchange rejected messages are dead-lettered through.
pub const DEAD_ROUTER: &str = "dead-router";
/// Prefix of the per-processor retry queue.
pub const RETRY_QUEUE_PREFIX: &str = "retry-";
/// Prefix of the per-processor dead-letter queue.
pub const DEAD_LETTER_QUEUE_PREFIX: &str = "dlq-";

/// The queue names of one processor's topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyNames {
    pub main_queue: String,
    pub retry_queue: String,
    pub dead_letter_queue: String,
}

impl TopologyNames {
    /// Derives the queue names from the processor name.
    pub fn derive(processor: &str) -> TopologyNames {
        TopologyNames {
            main_queue: processor.to_owned(),
            retry_queue: format!("{RETRY_QUEUE_PREFIX}{processor}"),
            dead_letter_queue: format!("{DEAD_LETTER_QUEUE_PREFIX}{processor}"),
        }
    }
}

/// The planned topology of one processor: derived names, queue and exchange
/// definitions, bindings and an optional broker-side TTL policy request.
pub struct ProcessorTopology {
    pub names: TopologyNames,
    exchanges: Vec<ExchangeDefinition>,
    queues: Vec<QueueDefinition>,
    bindings: Vec<QueueBinding>,
    ttl_policy: Option<(String, i64)>,
}

impl ProcessorTopology {
    /// Derives the full layout for a processor configuration.
    pub fn plan(config: &ProcessorConfig) -> ProcessorTopology {
        let names = TopologyNames::derive(&config.name);

        let exchanges = vec![
            ExchangeDefinition::new(MAIN_ROUTER).durable(),
            ExchangeDefinition::new(DEAD_ROUTER).durable(),
        ];

        let main = QueueDefinition::new(&names.main_queue)
            .durable()
            .dead_letter_to(DEAD_ROUTER, &names.main_queue);

        let mut retry = QueueDefinition::new(&names.retry_queue)
            .durable()
            .dead_letter_exchange(MAIN_ROUTER);

        // The retry delay either lives in the queue declaration or in a
        // broker-side operator policy, never both.
        let ttl_policy = if config.use_policy_for_delay {
            Some((names.retry_queue.clone(), config.retry_delay_ms as i64))
        } else {
            retry = retry.ttl(config.retry_delay_ms);
            None
        };

        let dead_letter = QueueDefinition::new(&names.dead_letter_queue)
            .durable()
            .dead_letter_to(MAIN_ROUTER, &names.dead_letter_queue);

        let bindings = vec![
            QueueBinding::new(&names.main_queue)
                .exchange(MAIN_ROUTER)
                .routing_key(config.topic_key()),
            QueueBinding::new(&names.main_queue)
                .exchange(MAIN_ROUTER)
                .routing_key(&names.main_queue),
            QueueBinding::new(&names.retry_queue)
                .exchange(DEAD_ROUTER)
                .routing_key(&names.main_queue),
            QueueBinding::new(&names.dead_letter_queue)
                .exchange(DEAD_ROUTER)
                .routing_key(&names.dead_letter_queue),
            QueueBinding::new(&names.dead_letter_queue)
                .exchange(MAIN_ROUTER)
                .routing_key(&names.dead_letter_queue),
        ];

        ProcessorTopology {
            names,
            exchanges,
            queues: vec![main, retry, dead_letter],
            bindings,
            ttl_policy,
        }
    }

    pub fn queues(&self) -> &[QueueDefinition] {
        &self.queues
    }

    pub fn bindings(&self) -> &[QueueBinding] {
        &self.bindings
    }

    /// The retry queue and delay when the delay is policy-managed.
    pub fn ttl_policy(&self) -> Option<&(String, i64)> {
        self.ttl_policy.as_ref()
    }

    /// Installs the layout on the broker.
    ///
    /// When the retry delay is policy-managed, a missing or failed policy
    /// apply fails the whole installation: a retry queue without any TTL
    /// would hold messages forever.
    pub async fn install(
        &self,
        channel: Arc<Channel>,
        policies: Option<&PolicyManager>,
    ) -> Result<(), AmqpError> {
        let mut topology = AmqpTopology::new(channel);
        for def in &self.exchanges {
            topology = topology.exchange(def.clone());
        }
        for def in &self.queues {
            topology = topology.queue(def.clone());
        }
        for binding in &self.bindings {
            topology = topology.binding(binding.clone());
        }
        topology.install().await?;

        if let Some((queue, ttl)) = &self.ttl_policy {
            let applied = match policies {
                Some(policies) => policies.apply_ttl(queue, *ttl).await,
                None => false,
            };

            if !applied {
                error!(queue = queue.as_str(), "ttl policy could not be applied");
                return Err(AmqpError::TtlPolicyError(queue.clone()));
            }
        }

        Ok(())
    }
}

/// A collection of exchanges, queues and bindings to install on the broker.
pub struct AmqpTopology {
    channel: Arc<Channel>,
    exchanges: Vec<ExchangeDefinition>,
    queues: Vec<QueueDefinition>,
    bindings: Vec<QueueBinding>,
}

impl AmqpTopology {
    pub fn new(channel: Arc<Channel>) -> AmqpTopology {
        AmqpTopology {
            channel,
            exchanges: vec![],
            queues: vec![],
            bindings: vec![],
        }
    }

    /// Adds an exchange definition to the topology.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue definition to the topology.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Adds a queue-to-exchange binding to the topology.
    pub fn binding(mut self, binding: QueueBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Installs the topology to the broker: exchanges first, then queues,
    /// then bindings.
    pub async fn install(&self) -> Result<(), AmqpError> {
        self.install_exchanges().await?;
        self.install_queues().await?;
        self.install_bindings().await
    }

    async fn install_exchanges(&self) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);

            match self
                .channel
                .exchange_declare(
                    &exch.name,
                    (&exch.kind).into(),
                    ExchangeDeclareOptions {
                        passive: exch.passive,
                        durable: exch.durable,
                        auto_delete: exch.delete,
                        internal: exch.internal,
                        nowait: exch.no_wait,
                    },
                    FieldTable::from(exch.params.clone()),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = exch.name.as_str(),
                        "error to declare the exchange"
                    );
                    Err(AmqpError::DeclareExchangeError(exch.name.clone()))
                }
                _ => Ok(()),
            }?;
        }

        Ok(())
    }

    async fn install_queues(&self) -> Result<(), AmqpError> {
        for def in &self.queues {
            debug!("creating queue: {}", def.name);

            match self
                .channel
                .queue_declare(
                    &def.name,
                    QueueDeclareOptions {
                        passive: def.passive,
                        durable: def.durable,
                        exclusive: def.exclusive,
                        auto_delete: def.delete,
                        nowait: def.no_wait,
                    },
                    def.arguments(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = def.name.as_str(),
                        "error to declare the queue"
                    );
                    Err(AmqpError::DeclareQueueError(def.name.clone()))
                }
                _ => Ok(()),
            }?;
        }

        Ok(())
    }

    async fn install_bindings(&self) -> Result<(), AmqpError> {
        for binding in &self.bindings {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            match self
                .channel
                .queue_bind(
                    &binding.queue_name,
                    &binding.exchange_name,
                    &binding.routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error to bind queue to exchange");
                    Err(AmqpError::BindingError(
                        binding.exchange_name.clone(),
                        binding.queue_name.clone(),
                    ))
                }
                _ => Ok(()),
            }?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{
        AMQP_HEADERS_DEAD_LETTER_EXCHANGE, AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY,
        AMQP_HEADERS_MESSAGE_TTL,
    };
    use lapin::types::{AMQPValue, LongString};

    #[test]
    fn names_are_derived_from_the_processor_name() {
        let names = TopologyNames::derive("orders");

        assert_eq!(names.main_queue, "orders");
        assert_eq!(names.retry_queue, "retry-orders");
        assert_eq!(names.dead_letter_queue, "dlq-orders");
    }

    #[test]
    fn main_queue_dead_letters_to_the_dead_router() {
        let topology = ProcessorTopology::plan(&ProcessorConfig::new("orders"));
        let main = &topology.queues()[0];

        assert_eq!(main.name(), "orders");
        let args = main.arguments();
        assert_eq!(
            args.inner().get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            Some(&AMQPValue::LongString(LongString::from(DEAD_ROUTER)))
        );
        assert_eq!(
            args.inner().get(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            Some(&AMQPValue::LongString(LongString::from("orders")))
        );
    }

    #[test]
    fn retry_queue_carries_a_fixed_ttl_by_default() {
        let config = ProcessorConfig::new("orders").retry_delay_ms(30_000);
        let topology = ProcessorTopology::plan(&config);
        let retry = &topology.queues()[1];

        assert_eq!(retry.name(), "retry-orders");
        let args = retry.arguments();
        assert_eq!(
            args.inner().get(AMQP_HEADERS_MESSAGE_TTL),
            Some(&AMQPValue::LongInt(30_000))
        );
        assert_eq!(
            args.inner().get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            Some(&AMQPValue::LongString(LongString::from(MAIN_ROUTER)))
        );
        assert!(topology.ttl_policy().is_none());
    }

    #[test]
    fn policy_managed_delay_drops_the_ttl_argument() {
        let config = ProcessorConfig::new("orders")
            .retry_delay_ms(30_000)
            .use_policy_for_delay();
        let topology = ProcessorTopology::plan(&config);
        let retry = &topology.queues()[1];

        assert!(retry.arguments().inner().get(AMQP_HEADERS_MESSAGE_TTL).is_none());
        assert_eq!(
            topology.ttl_policy(),
            Some(&("retry-orders".to_owned(), 30_000))
        );
    }

    #[test]
    fn dead_letter_queue_is_wired_back_to_the_main_router() {
        let topology = ProcessorTopology::plan(&ProcessorConfig::new("orders"));
        let dead_letter = &topology.queues()[2];

        assert_eq!(dead_letter.name(), "dlq-orders");
        let args = dead_letter.arguments();
        assert_eq!(
            args.inner().get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            Some(&AMQPValue::LongString(LongString::from(MAIN_ROUTER)))
        );
        assert_eq!(
            args.inner().get(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            Some(&AMQPValue::LongString(LongString::from("dlq-orders")))
        );
    }

    #[test]
    fn bindings_cover_topic_name_retry_and_dead_letter_routes() {
        let config = ProcessorConfig::new("orders").topic("order.created");
        let topology = ProcessorTopology::plan(&config);

        let expected = vec![
            QueueBinding::new("orders")
                .exchange(MAIN_ROUTER)
                .routing_key("order.created"),
            QueueBinding::new("orders")
                .exchange(MAIN_ROUTER)
                .routing_key("orders"),
            QueueBinding::new("retry-orders")
                .exchange(DEAD_ROUTER)
                .routing_key("orders"),
            QueueBinding::new("dlq-orders")
                .exchange(DEAD_ROUTER)
                .routing_key("dlq-orders"),
            QueueBinding::new("dlq-orders")
                .exchange(MAIN_ROUTER)
                .routing_key("dlq-orders"),
        ];

        assert_eq!(topology.bindings(), expected.as_slice());
    }

    #[test]
    fn planning_is_deterministic() {
        let config = ProcessorConfig::new("orders").max_attempts(3);
        let first = ProcessorTopology::plan(&config);
        let second = ProcessorTopology::plan(&config);

        assert_eq!(first.names, second.names);
        assert_eq!(first.queues(), second.queues());
        assert_eq!(first.bindings(), second.bindings());
    }
}
