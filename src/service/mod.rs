//! Proxy service for publishing and consuming broker messages.
//!
//! This module contains:
//! - `ProxyService` trait: the operations the HTTP layer invokes
//! - `ServiceError`: error taxonomy for proxy operations
//! - `init_service`: backend selection at startup
//! - Implementations: direct (librdkafka base clients), stream (librdkafka
//!   async facade), mock (in-memory, for tests)

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;

pub mod direct;
pub mod fetch;
pub mod mock;
pub mod session;
pub mod stream;

pub use direct::DirectKafkaService;
pub use mock::MockProxyService;
pub use stream::StreamKafkaService;

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Decoded message payload handed back to callers: a JSON object.
pub type Envelope = serde_json::Map<String, serde_json::Value>;

/// Errors that can occur during proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("connection to {target} failed: {message}")]
    Connection { target: String, message: String },

    #[error("publish to '{topic}' failed: {message}")]
    Publish { topic: String, message: String },

    #[error("fetch from '{topic}' for group '{group}' failed: {message}")]
    Fetch {
        topic: String,
        group: String,
        message: String,
    },

    #[error("no message on '{topic}' for group '{group}' within {seconds}s")]
    Timeout {
        topic: String,
        group: String,
        seconds: u64,
    },

    #[error("payload is not a JSON object: {source}")]
    Serialization {
        #[source]
        source: serde_json::Error,
    },

    #[error("message on '{topic}' is not a JSON object: {source}")]
    Deserialization {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("unsupported backend type '{0}'")]
    UnsupportedBackend(String),
}

impl ServiceError {
    /// True when the error is a consume deadline expiring with no data.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ServiceError::Timeout { .. })
    }
}

/// Operations the request layer invokes against the broker.
///
/// Implementations hold long-lived publisher and consumer sessions keyed by
/// topic and (topic, group) respectively, created on first use and shared
/// across concurrent requests.
#[async_trait]
pub trait ProxyService: Send + Sync {
    /// Publish one JSON object to `topic`.
    ///
    /// A non-empty `key` is attached to the message and influences partition
    /// assignment downstream. Returns once the broker has accepted the
    /// message; no retries are performed here.
    async fn send_message(&self, topic: &str, key: Option<&str>, payload: &Envelope)
        -> Result<()>;

    /// Wait for a single message on `topic` for `group`, acknowledge it, and
    /// return the decoded payload.
    ///
    /// A message that fails to decode is left unacknowledged; the next fetch
    /// observes it again.
    async fn retrieve_message(&self, topic: &str, group: &str) -> Result<Envelope>;

    /// Collect up to `max` messages under one shared deadline.
    ///
    /// Returns the messages gathered so far when the deadline expires after
    /// at least one was collected; a timeout with nothing collected is an
    /// error. `max` must be at least 1 (the HTTP layer coerces).
    async fn bulk_retrieve(&self, topic: &str, group: &str, max: usize) -> Result<Vec<Envelope>>;
}

/// Initialize the proxy service based on configuration.
///
/// The backend strategy is selected once at startup and is immutable
/// thereafter; unknown names fail here rather than at request time.
pub fn init_service(config: &Config) -> Result<Arc<dyn ProxyService>> {
    match config.backend.to_lowercase().as_str() {
        "direct" => {
            let service = DirectKafkaService::new(config)?;
            tracing::info!(backend = "direct", "proxy service initialized");
            Ok(Arc::new(service))
        }
        "stream" => {
            let service = StreamKafkaService::new(config)?;
            tracing::info!(backend = "stream", "proxy service initialized");
            Ok(Arc::new(service))
        }
        other => Err(ServiceError::UnsupportedBackend(other.to_string())),
    }
}

/// Decode a raw message payload into an [`Envelope`].
pub(crate) fn decode_envelope(topic: &str, payload: Option<&[u8]>) -> Result<Envelope> {
    serde_json::from_slice(payload.unwrap_or_default()).map_err(|e| {
        ServiceError::Deserialization {
            topic: topic.to_string(),
            source: e,
        }
    })
}
