//! Direct-client Kafka backend.
//!
//! Drives the librdkafka base clients by hand: `BaseProducer` with an
//! explicit flush per publish and `BaseConsumer` polled on the blocking
//! thread pool. Session layout matches the stream backend: one producer per
//! topic, one consumer per (topic, group).

use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::message::Message;
use rdkafka::producer::{BaseProducer, BaseRecord, Producer};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use super::fetch::{drain_messages, MessageFetch};
use super::session::SessionMap;
use super::{decode_envelope, Envelope, ProxyService, Result, ServiceError};
use crate::config::Config;

/// Flush timeout for a single publish.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for rewinding a consumer after a decode failure.
const SEEK_TIMEOUT: Duration = Duration::from_secs(1);

/// Proxy service backed by the rdkafka base clients.
pub struct DirectKafkaService {
    brokers: String,
    read_timeout: Duration,
    publishers: SessionMap<String, DirectPublisher>,
    consumers: SessionMap<(String, String), DirectConsumerSession>,
}

/// Publisher session bound to one topic.
struct DirectPublisher {
    topic: String,
    producer: BaseProducer,
}

/// Consumer session bound to one (topic, group) pair.
struct DirectConsumerSession {
    topic: String,
    group: String,
    read_timeout: Duration,
    consumer: Arc<BaseConsumer>,
    /// Serializes fetch-then-commit across callers. Held by the blocking
    /// task itself so an abandoned request cannot unlock mid-step.
    gate: Arc<Mutex<()>>,
}

impl DirectKafkaService {
    /// Create the service. Broker sessions are opened lazily on first use.
    pub fn new(config: &Config) -> Result<Self> {
        if config.brokers.trim().is_empty() {
            return Err(ServiceError::Connection {
                target: "kafka".to_string(),
                message: "no brokers configured".to_string(),
            });
        }

        Ok(Self {
            brokers: config.brokers.clone(),
            read_timeout: Duration::from_secs(config.read_timeout),
            publishers: SessionMap::new(),
            consumers: SessionMap::new(),
        })
    }

    fn producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        config.set("message.timeout.ms", "5000");
        config.set("acks", "all");
        config
    }

    fn consumer_config(&self, group: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        config.set("group.id", group);
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", "earliest");
        config
    }

    async fn publisher(&self, topic: &str) -> Result<Arc<DirectPublisher>> {
        self.publishers
            .get_or_create(topic.to_string(), || async {
                let producer: BaseProducer =
                    self.producer_config()
                        .create()
                        .map_err(|e| ServiceError::Connection {
                            target: format!("topic '{topic}'"),
                            message: e.to_string(),
                        })?;

                debug!(topic = %topic, "opened direct publisher");
                Ok(DirectPublisher {
                    topic: topic.to_string(),
                    producer,
                })
            })
            .await
    }

    async fn consumer(&self, topic: &str, group: &str) -> Result<Arc<DirectConsumerSession>> {
        self.consumers
            .get_or_create((topic.to_string(), group.to_string()), || async {
                let consumer: BaseConsumer =
                    self.consumer_config(group)
                        .create()
                        .map_err(|e| ServiceError::Connection {
                            target: format!("topic '{topic}' group '{group}'"),
                            message: e.to_string(),
                        })?;

                consumer
                    .subscribe(&[topic])
                    .map_err(|e| ServiceError::Connection {
                        target: format!("topic '{topic}' group '{group}'"),
                        message: e.to_string(),
                    })?;

                debug!(topic = %topic, group = %group, "opened direct consumer");
                Ok(DirectConsumerSession {
                    topic: topic.to_string(),
                    group: group.to_string(),
                    read_timeout: self.read_timeout,
                    consumer: Arc::new(consumer),
                    gate: Arc::new(Mutex::new(())),
                })
            })
            .await
    }
}

#[async_trait]
impl ProxyService for DirectKafkaService {
    async fn send_message(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &Envelope,
    ) -> Result<()> {
        if topic.is_empty() {
            return Err(ServiceError::EmptyTopic);
        }

        let bytes =
            serde_json::to_vec(payload).map_err(|e| ServiceError::Serialization { source: e })?;

        let publisher = self.publisher(topic).await?;
        let key = key.filter(|k| !k.is_empty()).map(str::to_string);

        let task =
            tokio::task::spawn_blocking(move || publisher.send_sync(key.as_deref(), &bytes));

        match task.await {
            Ok(result) => result,
            Err(e) => Err(ServiceError::Publish {
                topic: topic.to_string(),
                message: format!("publish task failed: {e}"),
            }),
        }
    }

    async fn retrieve_message(&self, topic: &str, group: &str) -> Result<Envelope> {
        if topic.is_empty() {
            return Err(ServiceError::EmptyTopic);
        }

        let session = self.consumer(topic, group).await?;
        let deadline = Instant::now() + self.read_timeout;
        session.next_envelope(deadline).await
    }

    async fn bulk_retrieve(&self, topic: &str, group: &str, max: usize) -> Result<Vec<Envelope>> {
        if topic.is_empty() {
            return Err(ServiceError::EmptyTopic);
        }

        let session = self.consumer(topic, group).await?;
        drain_messages(session.as_ref(), max, self.read_timeout).await
    }
}

impl DirectPublisher {
    /// Enqueue and flush one message. Runs on the blocking pool.
    fn send_sync(&self, key: Option<&str>, payload: &[u8]) -> Result<()> {
        let mut record = BaseRecord::to(&self.topic).payload(payload);
        if let Some(k) = key {
            record = record.key(k);
        }

        self.producer
            .send(record)
            .map_err(|(e, _)| ServiceError::Publish {
                topic: self.topic.clone(),
                message: e.to_string(),
            })?;

        self.producer
            .flush(SEND_TIMEOUT)
            .map_err(|e| ServiceError::Publish {
                topic: self.topic.clone(),
                message: format!("flush failed: {e}"),
            })?;

        debug!(topic = %self.topic, "published message");
        Ok(())
    }
}

impl DirectConsumerSession {
    fn fetch_error(&self, message: String) -> ServiceError {
        ServiceError::Fetch {
            topic: self.topic.clone(),
            group: self.group.clone(),
            message,
        }
    }
}

#[async_trait]
impl MessageFetch for DirectConsumerSession {
    async fn next_envelope(&self, deadline: Instant) -> Result<Envelope> {
        let guard = Arc::clone(&self.gate).lock_owned().await;

        let consumer = Arc::clone(&self.consumer);
        let topic = self.topic.clone();
        let group = self.group.clone();
        let timeout_secs = self.read_timeout.as_secs();

        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            fetch_one(&consumer, &topic, &group, deadline, timeout_secs)
        });

        match task.await {
            Ok(result) => result,
            Err(e) => Err(self.fetch_error(format!("fetch task failed: {e}"))),
        }
    }
}

/// One poll-decode-commit step against the base consumer. Runs on the
/// blocking pool; `deadline` bounds the poll.
fn fetch_one(
    consumer: &BaseConsumer,
    topic: &str,
    group: &str,
    deadline: Instant,
    timeout_secs: u64,
) -> Result<Envelope> {
    let timeout = ServiceError::Timeout {
        topic: topic.to_string(),
        group: group.to_string(),
        seconds: timeout_secs,
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(timeout);
    }

    let message = match consumer.poll(remaining) {
        None => return Err(timeout),
        Some(Err(e)) => {
            return Err(ServiceError::Fetch {
                topic: topic.to_string(),
                group: group.to_string(),
                message: e.to_string(),
            })
        }
        Some(Ok(message)) => message,
    };

    match decode_envelope(topic, message.payload()) {
        Ok(envelope) => {
            let mut committed = TopicPartitionList::new();
            committed
                .add_partition_offset(
                    message.topic(),
                    message.partition(),
                    Offset::Offset(message.offset() + 1),
                )
                .map_err(|e| ServiceError::Fetch {
                    topic: topic.to_string(),
                    group: group.to_string(),
                    message: format!("commit failed: {e}"),
                })?;
            consumer
                .commit(&committed, CommitMode::Sync)
                .map_err(|e| ServiceError::Fetch {
                    topic: topic.to_string(),
                    group: group.to_string(),
                    message: format!("commit failed: {e}"),
                })?;

            debug!(topic = %topic, group = %group, offset = message.offset(), "delivered message");
            Ok(envelope)
        }
        Err(err) => {
            // Rewind so the next fetch observes the same message; the
            // committed offset never advanced past it.
            if let Err(e) = consumer.seek(
                message.topic(),
                message.partition(),
                Offset::Offset(message.offset()),
                SEEK_TIMEOUT,
            ) {
                warn!(
                    topic = %topic,
                    group = %group,
                    offset = message.offset(),
                    error = %e,
                    "seek after decode failure failed"
                );
            }
            Err(err)
        }
    }
}
