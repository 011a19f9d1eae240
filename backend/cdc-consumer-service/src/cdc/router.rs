use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::classifier::classify;
use super::decoder::decode;
use super::dispatcher::{DispatchOutcome, EntityDispatcher};
use super::models::{Entity, InboundRecord};
use crate::error::{CdcError, Result};
use crate::metrics;

/// Result of running one record through the pipeline.
///
/// Every variant means the record is done and its offset may be committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Dispatched(DispatchOutcome),
    /// Payload was not decodable; record dropped.
    DecodeFailed,
    /// Empty record value (tombstone following a delete).
    Tombstone,
    /// No pipeline is bound to the record's topic.
    Unrouted,
}

/// Decode → classify → dispatch for one entity type, with the entity erased.
pub trait RecordPipeline: Send + Sync {
    fn entity_type(&self) -> &'static str;

    /// Process a record with a non-empty payload. Never fails.
    fn process(&self, record: &InboundRecord<'_>, payload: &[u8]) -> RecordOutcome;
}

struct EntityPipeline<E: Entity> {
    dispatcher: EntityDispatcher<E>,
}

impl<E: Entity> RecordPipeline for EntityPipeline<E> {
    fn entity_type(&self) -> &'static str {
        E::ENTITY_TYPE
    }

    fn process(&self, record: &InboundRecord<'_>, payload: &[u8]) -> RecordOutcome {
        let envelope = match decode::<E>(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    topic = record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    payload = %String::from_utf8_lossy(payload),
                    "Failed to decode {} event, dropping record: {}",
                    E::ENTITY_TYPE,
                    e
                );
                return RecordOutcome::DecodeFailed;
            }
        };

        let kind = classify(&envelope);
        let outcome = self
            .dispatcher
            .dispatch(kind, &envelope, &record.context(), payload);
        RecordOutcome::Dispatched(outcome)
    }
}

/// Immutable topic → pipeline table shared by every consumption stream.
#[derive(Clone, Default)]
pub struct TopicRouter {
    routes: Arc<HashMap<String, Arc<dyn RecordPipeline>>>,
}

impl TopicRouter {
    pub fn builder() -> TopicRouterBuilder {
        TopicRouterBuilder::default()
    }

    /// Topics with a bound pipeline, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn entity_for(&self, topic: &str) -> Option<&'static str> {
        self.routes.get(topic).map(|pipeline| pipeline.entity_type())
    }

    /// Run one delivered record to completion.
    ///
    /// Synchronous and infallible: whatever happens inside, the caller may
    /// acknowledge the record afterwards.
    pub fn process(&self, record: &InboundRecord<'_>) -> RecordOutcome {
        metrics::record_received(record.topic);

        let Some(pipeline) = self.routes.get(record.topic) else {
            warn!(
                topic = record.topic,
                partition = record.partition,
                offset = record.offset,
                "Received record for unexpected topic"
            );
            return RecordOutcome::Unrouted;
        };

        let payload = match record.payload {
            Some(payload) if !payload.is_empty() => payload,
            _ => {
                debug!(
                    topic = record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "Skipping {} tombstone with empty payload",
                    pipeline.entity_type()
                );
                metrics::record_tombstone(record.topic);
                return RecordOutcome::Tombstone;
            }
        };

        let outcome = pipeline.process(record, payload);
        match outcome {
            RecordOutcome::DecodeFailed => metrics::record_decode_failure(record.topic),
            RecordOutcome::Dispatched(DispatchOutcome::Unrecognized) => {
                metrics::record_unknown_operation(record.topic)
            }
            RecordOutcome::Dispatched(DispatchOutcome::HandlerFailed) => {
                metrics::record_handler_failure(record.topic)
            }
            _ => {}
        }
        outcome
    }
}

#[derive(Default)]
pub struct TopicRouterBuilder {
    routes: HashMap<String, Arc<dyn RecordPipeline>>,
}

impl TopicRouterBuilder {
    /// Bind `topic` to the pipeline for entity `E`.
    pub fn route<E: Entity>(
        mut self,
        topic: impl Into<String>,
        dispatcher: EntityDispatcher<E>,
    ) -> Result<Self> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(CdcError::config(format!(
                "empty topic name for {} events",
                E::ENTITY_TYPE
            )));
        }
        if let Some(existing) = self.routes.get(&topic) {
            return Err(CdcError::config(format!(
                "topic '{}' is already routed to {} events",
                topic,
                existing.entity_type()
            )));
        }

        debug!(topic = %topic, entity = E::ENTITY_TYPE, "Binding topic to entity pipeline");
        self.routes
            .insert(topic, Arc::new(EntityPipeline { dispatcher }));
        Ok(self)
    }

    pub fn build(self) -> TopicRouter {
        TopicRouter {
            routes: Arc::new(self.routes),
        }
    }
}
