//! Kafka consumption streams, one per routed topic.
//!
//! All streams share one consumer group, so partition assignment is left to
//! the broker's group coordinator. Within a stream records are handled one at
//! a time in delivery order; separate topics run in separate tasks. Handlers
//! are synchronous, so each record is processed on the blocking pool and a
//! slow handler only holds up its own stream.
//!
//! # Guarantees
//! - At-least-once: a record's offset is committed only after the router is
//!   done with it, whatever the handler outcome was
//! - Nothing a single record does can end its stream
//! - Shutdown is observed between records, never during a dispatch

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Message, OwnedMessage};
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::models::InboundRecord;
use super::router::{RecordOutcome, TopicRouter};
use crate::config::KafkaConfig;
use crate::error::{CdcError, Result};
use crate::metrics;

/// Consecutive receive errors before they are logged at error level
const PERSISTENT_ERROR_THRESHOLD: u32 = 5;

/// Consecutive receive errors before emitting a critical log line
const CRITICAL_ERROR_THRESHOLD: u32 = 10;

/// Log severity for a run of consecutive receive errors. Never decreases as
/// the run grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Logged at warn; the broker client usually recovers on its own
    Transient,
    Persistent,
    Critical,
}

/// Backoff state for broker receive errors on one stream
#[derive(Debug, Default)]
pub struct ReceiveBackoff {
    consecutive: u32,
}

impl ReceiveBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Record an error and return the new consecutive count
    pub fn record_error(&mut self) -> u32 {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive
    }

    pub fn severity(&self) -> ErrorSeverity {
        if self.consecutive >= CRITICAL_ERROR_THRESHOLD {
            ErrorSeverity::Critical
        } else if self.consecutive >= PERSISTENT_ERROR_THRESHOLD {
            ErrorSeverity::Persistent
        } else {
            ErrorSeverity::Transient
        }
    }

    /// Exponential backoff: 1s, 2s, 4s ... capped at 60s
    pub fn delay(&self) -> Duration {
        const MIN_BACKOFF_SECS: u64 = 1;
        const MAX_BACKOFF_SECS: u64 = 60;

        if self.consecutive == 0 {
            return Duration::from_secs(MIN_BACKOFF_SECS);
        }

        let backoff_secs = 2u64
            .saturating_pow(self.consecutive.saturating_sub(1))
            .min(MAX_BACKOFF_SECS);
        Duration::from_secs(backoff_secs)
    }
}

/// Run one broker message through the router.
///
/// Separate from the receive loop so it works on any [`Message`], including
/// owned ones.
pub fn process_message<M: Message>(router: &TopicRouter, msg: &M) -> RecordOutcome {
    let record = InboundRecord::new(msg.topic(), msg.partition(), msg.offset(), msg.payload());
    router.process(&record)
}

/// Run one detached message through the router on the blocking pool.
///
/// Returns `None` only if the blocking task itself could not complete; the
/// record is still treated as processed.
pub async fn process_detached(router: &TopicRouter, msg: OwnedMessage) -> Option<RecordOutcome> {
    let (partition, offset) = (msg.partition(), msg.offset());
    let topic = msg.topic().to_string();
    let router = router.clone();

    match tokio::task::spawn_blocking(move || process_message(&router, &msg)).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!(
                topic = %topic,
                partition = partition,
                offset = offset,
                "CDC record processing task failed: {}",
                e
            );
            None
        }
    }
}

/// Owns the consumer group settings and the topic router, and starts one
/// stream per routed topic.
pub struct SubscriptionManager {
    config: KafkaConfig,
    router: TopicRouter,
}

impl SubscriptionManager {
    pub fn new(config: KafkaConfig, router: TopicRouter) -> Self {
        Self { config, router }
    }

    /// Create and subscribe every consumer, then spawn their streams.
    ///
    /// Consumers are all created before any stream is spawned, so a startup
    /// failure leaves nothing half-running.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        let topics = self.router.topics();
        if topics.is_empty() {
            return Err(CdcError::config("no topics are routed to an entity"));
        }

        let mut streams = Vec::with_capacity(topics.len());
        for topic in topics {
            let consumer = self.create_consumer(&topic)?;
            streams.push(TopicStream {
                topic,
                consumer,
                router: self.router.clone(),
                backoff: ReceiveBackoff::new(),
            });
        }

        info!(
            group_id = %self.config.group_id,
            streams = streams.len(),
            "Starting CDC consumption streams"
        );

        Ok(streams
            .into_iter()
            .map(|stream| tokio::spawn(stream.run(shutdown.clone())))
            .collect())
    }

    fn create_consumer(&self, topic: &str) -> Result<StreamConsumer> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &self.config.group_id)
            .set("bootstrap.servers", &self.config.brokers)
            .set("enable.auto.commit", "false") // committed after each processed record
            .set("auto.offset.reset", self.config.auto_offset_reset.as_str())
            .set("session.timeout.ms", self.config.session_timeout_ms.to_string())
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| {
                error!("Failed to create Kafka consumer for topic {}: {}", topic, e);
                CdcError::Kafka(e)
            })?;

        consumer.subscribe(&[topic]).map_err(|e| {
            error!("Failed to subscribe to topic {}: {}", topic, e);
            CdcError::Kafka(e)
        })?;

        info!(
            "Created Kafka consumer for topic '{}' with group '{}'",
            topic, self.config.group_id
        );
        Ok(consumer)
    }
}

struct TopicStream {
    topic: String,
    consumer: StreamConsumer,
    router: TopicRouter,
    backoff: ReceiveBackoff,
}

impl TopicStream {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            topic = %self.topic,
            entity = self.router.entity_for(&self.topic).unwrap_or("unrouted"),
            "CDC stream started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender dropped: nobody can ask us to stop anymore, so stop now.
                        break;
                    }
                }
                received = self.consumer.recv() => match received.map(|msg| msg.detach()) {
                    Ok(msg) => {
                        self.backoff.record_success();

                        let (partition, offset) = (msg.partition(), msg.offset());
                        let outcome = process_detached(&self.router, msg).await;
                        debug!(
                            topic = %self.topic,
                            partition = partition,
                            offset = offset,
                            outcome = ?outcome,
                            "CDC record processed"
                        );

                        self.commit(partition, offset);
                    }
                    Err(e) => {
                        let consecutive = self.backoff.record_error();
                        let backoff = self.backoff.delay();
                        metrics::record_consumer_error();

                        match self.backoff.severity() {
                            ErrorSeverity::Critical => error!(
                                topic = %self.topic,
                                consecutive_errors = consecutive,
                                backoff_secs = backoff.as_secs(),
                                "CRITICAL: Kafka consumer experiencing persistent failures. \
                                 Manual intervention may be required. Error: {}",
                                e
                            ),
                            ErrorSeverity::Persistent => error!(
                                topic = %self.topic,
                                consecutive_errors = consecutive,
                                backoff_secs = backoff.as_secs(),
                                "Kafka consumer failing repeatedly (will retry with backoff): {}",
                                e
                            ),
                            ErrorSeverity::Transient => warn!(
                                topic = %self.topic,
                                consecutive_errors = consecutive,
                                backoff_secs = backoff.as_secs(),
                                "Kafka consumer error (will retry with backoff): {}",
                                e
                            ),
                        }

                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = shutdown.changed() => {}
                        }
                    }
                }
            }
        }

        self.consumer.unsubscribe();
        info!(topic = %self.topic, "CDC stream stopped");
    }

    /// Commit the position after `offset`, as `commit_message` would.
    fn commit(&self, partition: i32, offset: i64) {
        let mut offsets = TopicPartitionList::new();
        let result = offsets
            .add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))
            .and_then(|_| self.consumer.commit(&offsets, CommitMode::Async));

        if let Err(e) = result {
            warn!(
                topic = %self.topic,
                partition = partition,
                offset = offset,
                "Failed to commit Kafka offset: {}",
                e
            );
        }
    }
}
