// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Processing Pipeline
//!
//! An ordered chain of stages wrapping the user handler. Each stage receives
//! the message and a [`Next`] continuation for the stages below it; a stage
//! decides whether to run the rest of the chain, what to do with its result,
//! and what to report upwards.
//!
//! The chain is an explicit list composed via [`PipelineBuilder`] rather
//! than literal nesting, so stages can be inserted, removed and unit tested
//! in isolation. A pipeline is built fresh per delivery and stages hold no
//! cross-message state.

use crate::{errors::AmqpError, message::InboundMessage};
use async_trait::async_trait;
use std::sync::Arc;

/// Outcome of a stage: `Ok(true)` for success, `Ok(false)` when a failure
/// was fully handled downstream (no further ack/nack required), `Err` for a
/// failure still looking for an owner.
pub type StageResult = Result<bool, AmqpError>;

/// One stage of the processing chain.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Processes the message, driving the rest of the chain through `next`.
    async fn consume(&self, message: &InboundMessage, next: Next<'_>) -> StageResult;
}

/// Continuation over the remaining stages of a pipeline.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn PipelineStage>],
}

impl<'a> Next<'a> {
    /// Runs the remaining stages. An empty tail resolves to success so the
    /// innermost stage can simply ignore its continuation.
    pub async fn run(self, message: &InboundMessage) -> StageResult {
        match self.remaining.split_first() {
            Some((stage, rest)) => stage.consume(message, Next { remaining: rest }).await,
            None => Ok(true),
        }
    }
}

/// An ordered chain of stages, outermost first.
pub struct Pipeline {
    stages: Vec<Arc<dyn PipelineStage>>,
}

impl Pipeline {
    /// Creates a builder for an empty pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder { stages: vec![] }
    }

    /// Pushes the message through the chain.
    pub async fn consume(&self, message: &InboundMessage) -> StageResult {
        Next {
            remaining: &self.stages,
        }
        .run(message)
        .await
    }
}

/// Builder assembling a pipeline stage by stage, outermost first.
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn PipelineStage>>,
}

impl PipelineBuilder {
    /// Appends a stage inside the previously added ones.
    pub fn stage(mut self, stage: Arc<dyn PipelineStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MockMessageHandle;
    use lapin::BasicProperties;
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl PipelineStage for Recorder {
        async fn consume(&self, message: &InboundMessage, next: Next<'_>) -> StageResult {
            self.log.lock().unwrap().push(self.label);
            next.run(message).await
        }
    }

    fn test_message() -> InboundMessage {
        InboundMessage::new(
            vec![],
            BasicProperties::default(),
            "main-router".to_owned(),
            "orders".to_owned(),
            1,
            "orders".to_owned(),
            Arc::new(MockMessageHandle::new()),
        )
    }

    #[tokio::test]
    async fn stages_run_in_registration_order() {
        let log = Arc::new(Mutex::new(vec![]));
        let pipeline = Pipeline::builder()
            .stage(Arc::new(Recorder {
                label: "outer",
                log: log.clone(),
            }))
            .stage(Arc::new(Recorder {
                label: "inner",
                log: log.clone(),
            }))
            .build();

        let result = pipeline.consume(&test_message()).await;

        assert_eq!(result, Ok(true));
        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn empty_pipeline_resolves_to_success() {
        let pipeline = Pipeline::builder().build();
        assert_eq!(pipeline.consume(&test_message()).await, Ok(true));
    }
}
