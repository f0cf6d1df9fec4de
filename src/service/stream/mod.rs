//! Stream-client Kafka backend.
//!
//! Uses the rdkafka async facade: `FutureProducer` for delivery-confirmed
//! publishes and `StreamConsumer` for awaitable fetches. One producer per
//! topic and one consumer per (topic, group), created on first use and kept
//! for the process lifetime.

use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Offset};
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, warn};

use super::fetch::{drain_messages, MessageFetch};
use super::session::SessionMap;
use super::{decode_envelope, Envelope, ProxyService, Result, ServiceError};
use crate::config::Config;

/// Delivery timeout for a single publish.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for rewinding a consumer after a decode failure.
const SEEK_TIMEOUT: Duration = Duration::from_secs(1);

/// Proxy service backed by the rdkafka asynchronous clients.
pub struct StreamKafkaService {
    brokers: String,
    read_timeout: Duration,
    publishers: SessionMap<String, StreamPublisher>,
    consumers: SessionMap<(String, String), StreamConsumerSession>,
}

/// Publisher session bound to one topic.
struct StreamPublisher {
    topic: String,
    producer: FutureProducer,
}

/// Consumer session bound to one (topic, group) pair.
///
/// The lock serializes fetch-then-commit so concurrent callers cannot
/// commit out of order or double-consume.
struct StreamConsumerSession {
    topic: String,
    group: String,
    read_timeout: Duration,
    inner: Mutex<StreamConsumer>,
}

impl StreamKafkaService {
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

    async fn publisher(&self, topic: &str) -> Result<Arc<StreamPublisher>> {
        self.publishers
            .get_or_create(topic.to_string(), || async {
                let producer: FutureProducer =
                    self.producer_config()
                        .create()
                        .map_err(|e| ServiceError::Connection {
                            target: format!("topic '{topic}'"),
                            message: e.to_string(),
                        })?;

                debug!(topic = %topic, "opened stream publisher");
                Ok(StreamPublisher {
                    topic: topic.to_string(),
                    producer,
                })
            })
            .await
    }

    async fn consumer(&self, topic: &str, group: &str) -> Result<Arc<StreamConsumerSession>> {
        self.consumers
            .get_or_create((topic.to_string(), group.to_string()), || async {
                let consumer: StreamConsumer =
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

                debug!(topic = %topic, group = %group, "opened stream consumer");
                Ok(StreamConsumerSession {
                    topic: topic.to_string(),
                    group: group.to_string(),
                    read_timeout: self.read_timeout,
                    inner: Mutex::new(consumer),
                })
            })
            .await
    }
}

#[async_trait]
impl ProxyService for StreamKafkaService {
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
        publisher.send(key, &bytes).await
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

impl StreamPublisher {
    async fn send(&self, key: Option<&str>, payload: &[u8]) -> Result<()> {
        let mut record = FutureRecord::to(&self.topic).payload(payload);
        if let Some(k) = key.filter(|k| !k.is_empty()) {
            record = record.key(k);
        }

        let (partition, offset) = self
            .producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(e, _)| ServiceError::Publish {
                topic: self.topic.clone(),
                message: e.to_string(),
            })?;

        debug!(topic = %self.topic, partition, offset, "published message");
        Ok(())
    }
}

impl StreamConsumerSession {
    fn timeout_error(&self) -> ServiceError {
        ServiceError::Timeout {
            topic: self.topic.clone(),
            group: self.group.clone(),
            seconds: self.read_timeout.as_secs(),
        }
    }

    fn fetch_error(&self, message: String) -> ServiceError {
        ServiceError::Fetch {
            topic: self.topic.clone(),
            group: self.group.clone(),
            message,
        }
    }
}

#[async_trait]
impl MessageFetch for StreamConsumerSession {
    async fn next_envelope(&self, deadline: Instant) -> Result<Envelope> {
        let consumer = self.inner.lock().await;

        let message = match timeout_at(deadline, consumer.recv()).await {
            Err(_) => return Err(self.timeout_error()),
            Ok(Err(e)) => return Err(self.fetch_error(e.to_string())),
            Ok(Ok(message)) => message,
        };

        match decode_envelope(&self.topic, message.payload()) {
            Ok(envelope) => {
                consumer
                    .commit_message(&message, CommitMode::Async)
                    .map_err(|e| self.fetch_error(format!("commit failed: {e}")))?;

                debug!(
                    topic = %self.topic,
                    group = %self.group,
                    offset = message.offset(),
                    "delivered message"
                );
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
                        topic = %self.topic,
                        group = %self.group,
                        offset = message.offset(),
                        error = %e,
                        "seek after decode failure failed"
                    );
                }
                Err(err)
            }
        }
    }
}
