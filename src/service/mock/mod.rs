//! In-memory proxy service for testing.
//!
//! Keeps messages in per-topic queues with independent per-group read
//! cursors, mirroring the at-least-once contract of the broker backends
//! without a broker: a cursor only advances after a message decodes.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep_until, Duration, Instant};

use super::fetch::{drain_messages, MessageFetch};
use super::{decode_envelope, Envelope, ProxyService, Result, ServiceError};

/// Stored message: optional key plus encoded payload.
#[derive(Debug, Clone)]
struct StoredMessage {
    key: Option<String>,
    value: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    topics: HashMap<String, Vec<StoredMessage>>,
    cursors: HashMap<(String, String), usize>,
    fail_on_send: bool,
}

/// In-memory [`ProxyService`].
pub struct MockProxyService {
    state: Mutex<MockState>,
    arrivals: Notify,
    read_timeout: Duration,
}

impl Default for MockProxyService {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            arrivals: Notify::new(),
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl MockProxyService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the consume deadline (defaults to 10s).
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Make subsequent sends fail with a publish error.
    pub async fn set_fail_on_send(&self, fail: bool) {
        self.state.lock().await.fail_on_send = fail;
    }

    /// Append a raw payload to a topic, bypassing serialization.
    pub async fn push_raw(&self, topic: &str, value: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .await
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(StoredMessage {
                key: None,
                value: value.into(),
            });
        self.arrivals.notify_waiters();
    }

    /// Keys of every message stored on `topic`, in send order.
    pub async fn stored_keys(&self, topic: &str) -> Vec<Option<String>> {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map(|messages| messages.iter().map(|m| m.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of messages stored on `topic`.
    pub async fn stored_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map(Vec::len)
            .unwrap_or_default()
    }

    fn cursor<'a>(&self, topic: &'a str, group: &'a str) -> MockCursor<'a, '_> {
        MockCursor {
            service: self,
            topic,
            group,
        }
    }
}

/// One (topic, group) read position over the shared state.
struct MockCursor<'a, 's> {
    service: &'s MockProxyService,
    topic: &'a str,
    group: &'a str,
}

#[async_trait]
impl MessageFetch for MockCursor<'_, '_> {
    async fn next_envelope(&self, deadline: Instant) -> Result<Envelope> {
        loop {
            let arrival = self.service.arrivals.notified();

            {
                let mut state = self.service.state.lock().await;
                let MockState {
                    topics, cursors, ..
                } = &mut *state;

                let position = cursors
                    .entry((self.topic.to_string(), self.group.to_string()))
                    .or_insert(0);

                if let Some(message) = topics.get(self.topic).and_then(|m| m.get(*position)) {
                    let envelope = decode_envelope(self.topic, Some(&message.value))?;
                    // Acknowledge only after a successful decode.
                    *position += 1;
                    return Ok(envelope);
                }
            }

            tokio::select! {
                _ = sleep_until(deadline) => {
                    return Err(ServiceError::Timeout {
                        topic: self.topic.to_string(),
                        group: self.group.to_string(),
                        seconds: self.service.read_timeout.as_secs(),
                    });
                }
                _ = arrival => {}
            }
        }
    }
}

#[async_trait]
impl ProxyService for MockProxyService {
    async fn send_message(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &Envelope,
    ) -> Result<()> {
        if topic.is_empty() {
            return Err(ServiceError::EmptyTopic);
        }

        let value =
            serde_json::to_vec(payload).map_err(|e| ServiceError::Serialization { source: e })?;

        let mut state = self.state.lock().await;
        if state.fail_on_send {
            return Err(ServiceError::Publish {
                topic: topic.to_string(),
                message: "mock send failure".to_string(),
            });
        }

        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(StoredMessage {
                key: key.filter(|k| !k.is_empty()).map(str::to_string),
                value,
            });
        drop(state);

        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn retrieve_message(&self, topic: &str, group: &str) -> Result<Envelope> {
        if topic.is_empty() {
            return Err(ServiceError::EmptyTopic);
        }

        let deadline = Instant::now() + self.read_timeout;
        self.cursor(topic, group).next_envelope(deadline).await
    }

    async fn bulk_retrieve(&self, topic: &str, group: &str, max: usize) -> Result<Vec<Envelope>> {
        if topic.is_empty() {
            return Err(ServiceError::EmptyTopic);
        }

        let cursor = self.cursor(topic, group);
        drain_messages(&cursor, max, self.read_timeout).await
    }
}
