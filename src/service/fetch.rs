//! Deadline-bounded message collection.
//!
//! One fetch step (wait, decode, acknowledge) sits behind [`MessageFetch`];
//! [`drain_messages`] drives it with the shared deadline and partial-result
//! rules for bulk consumes.

use async_trait::async_trait;
use tokio::time::{Duration, Instant};

use super::{Envelope, Result};

/// A consumer session able to produce decoded, acknowledged messages.
#[async_trait]
pub trait MessageFetch: Send + Sync {
    /// Wait for the next message until `deadline`, decode it, acknowledge
    /// it, and return the payload.
    ///
    /// Acknowledgment happens only after a successful decode; a message
    /// that fails to decode stays unacknowledged and is observed again by
    /// the next call.
    async fn next_envelope(&self, deadline: Instant) -> Result<Envelope>;
}

/// Collect up to `max` envelopes within `timeout`.
///
/// The deadline is shared across the whole call, not per message. Expiring
/// after at least one envelope was collected yields the partial batch as a
/// success; expiring with nothing collected yields the timeout error. Any
/// other error aborts immediately; envelopes already acknowledged in this
/// call are consumed and will not be redelivered.
pub async fn drain_messages<S>(source: &S, max: usize, timeout: Duration) -> Result<Vec<Envelope>>
where
    S: MessageFetch + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut envelopes = Vec::new();

    while envelopes.len() < max {
        match source.next_envelope(deadline).await {
            Ok(envelope) => envelopes.push(envelope),
            Err(err) if err.is_timeout() && !envelopes.is_empty() => return Ok(envelopes),
            Err(err) => return Err(err),
        }
    }

    Ok(envelopes)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tokio::sync::Mutex;
    use tokio::time::sleep_until;

    use super::*;
    use crate::service::ServiceError;

    enum Step {
        Message(Envelope),
        Fail(ServiceError),
    }

    /// Scripted source: pops one step per call; an empty script waits out
    /// the deadline like a consumer with no data.
    struct Scripted {
        steps: Mutex<VecDeque<Step>>,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into_iter().collect()),
            }
        }

        fn message(n: u64) -> Step {
            let mut envelope = Envelope::new();
            envelope.insert("n".to_string(), serde_json::json!(n));
            Step::Message(envelope)
        }

        async fn remaining(&self) -> usize {
            self.steps.lock().await.len()
        }
    }

    #[async_trait]
    impl MessageFetch for Scripted {
        async fn next_envelope(&self, deadline: Instant) -> Result<Envelope> {
            let step = self.steps.lock().await.pop_front();
            match step {
                Some(Step::Message(envelope)) => Ok(envelope),
                Some(Step::Fail(err)) => Err(err),
                None => {
                    sleep_until(deadline).await;
                    Err(ServiceError::Timeout {
                        topic: "t".to_string(),
                        group: "g".to_string(),
                        seconds: 1,
                    })
                }
            }
        }
    }

    fn collected(envelopes: &[Envelope]) -> Vec<u64> {
        envelopes
            .iter()
            .map(|e| e.get("n").and_then(|v| v.as_u64()).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fewer_available_than_max_is_success() {
        let source = Scripted::new(vec![
            Scripted::message(1),
            Scripted::message(2),
            Scripted::message(3),
        ]);

        let envelopes = drain_messages(&source, 5, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(collected(&envelopes), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_topic_times_out() {
        let source = Scripted::new(vec![]);

        let err = drain_messages(&source, 5, Duration::from_secs(1))
            .await
            .err()
            .expect("no data should time out");
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_after_partial_batch_is_success() {
        let source = Scripted::new(vec![Scripted::message(1), Scripted::message(2)]);

        let envelopes = drain_messages(&source, 10, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(collected(&envelopes), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_bounds_collection() {
        let source = Scripted::new(vec![
            Scripted::message(1),
            Scripted::message(2),
            Scripted::message(3),
            Scripted::message(4),
            Scripted::message(5),
        ]);

        let envelopes = drain_messages(&source, 3, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(collected(&envelopes), vec![1, 2, 3]);
        assert_eq!(source.remaining().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_timeout_error_aborts() {
        let source = Scripted::new(vec![
            Scripted::message(1),
            Step::Fail(ServiceError::Fetch {
                topic: "t".to_string(),
                group: "g".to_string(),
                message: "broker went away".to_string(),
            }),
            Scripted::message(2),
        ]);

        let err = drain_messages(&source, 5, Duration::from_secs(1))
            .await
            .err()
            .expect("broker error should abort the batch");
        assert!(matches!(err, ServiceError::Fetch { .. }));
    }
}
