//! Request handlers.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::Json;

use super::error::ApiError;
use super::SharedService;
use crate::service::Envelope;

/// Liveness probe.
pub(super) async fn status() -> &'static str {
    "OK"
}

/// Publish a JSON object without a key.
pub(super) async fn send(
    State(service): State<SharedService>,
    Path(topic): Path<String>,
    Json(payload): Json<Envelope>,
) -> Result<&'static str, ApiError> {
    service.send_message(&topic, None, &payload).await?;
    Ok("OK")
}

/// Publish a JSON object with a partition key.
pub(super) async fn send_with_key(
    State(service): State<SharedService>,
    Path((topic, key)): Path<(String, String)>,
    Json(payload): Json<Envelope>,
) -> Result<&'static str, ApiError> {
    service.send_message(&topic, Some(&key), &payload).await?;
    Ok("OK")
}

/// Consume up to `max` messages for a consumer group.
pub(super) async fn retrieve(
    State(service): State<SharedService>,
    Path((topic, group)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Envelope>>, ApiError> {
    // Anything unparsable or non-positive falls back to a single message.
    let max = params
        .get("max")
        .and_then(|raw| raw.parse::<i64>().ok())
        .filter(|m| *m > 0)
        .unwrap_or(1) as usize;

    let envelopes = service.bulk_retrieve(&topic, &group, max).await?;
    Ok(Json(envelopes))
}
