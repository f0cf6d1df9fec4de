use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use tokio::time::Duration;
use tower::ServiceExt;

use super::*;
use crate::service::{Envelope, MockProxyService, ProxyService};

fn app(service: &Arc<MockProxyService>) -> Router {
    router(Arc::clone(service) as SharedService)
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_status() {
    let service = Arc::new(MockProxyService::new());

    let response = app(&service).oneshot(get("/status")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], &b"OK"[..]);
}

#[tokio::test]
async fn test_send_and_retrieve_round_trip() {
    let service = Arc::new(MockProxyService::new());
    let app = app(&service);

    let response = app
        .clone()
        .oneshot(post_json("/topic/greetings", r#"{"a":1}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get("/topic/greetings/readers"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([{"a": 1}]));
}

#[tokio::test]
async fn test_send_with_key() {
    let service = Arc::new(MockProxyService::new());

    let response = app(&service)
        .oneshot(post_json("/topic/orders/order-7", r#"{"qty":2}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        service.stored_keys("orders").await,
        vec![Some("order-7".to_string())]
    );
}

#[tokio::test]
async fn test_retrieve_coerces_max() {
    let service = Arc::new(MockProxyService::new());
    let mut payload = Envelope::new();
    payload.insert("n".to_string(), serde_json::json!(0));
    for _ in 0..3 {
        service.send_message("orders", None, &payload).await.unwrap();
    }
    let app = app(&service);

    for uri in [
        "/topic/orders/g-zero?max=0",
        "/topic/orders/g-neg?max=-4",
        "/topic/orders/g-junk?max=lots",
        "/topic/orders/g-none",
    ] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1, "uri {uri}");
    }

    let response = app.oneshot(get("/topic/orders/g-two?max=2")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retrieve_empty_topic_times_out() {
    let service =
        Arc::new(MockProxyService::new().with_read_timeout(Duration::from_millis(100)));

    let response = app(&service).oneshot(get("/topic/empty/g")).await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = body_json(response).await;
    assert_eq!(body["code"], serde_json::json!(504));
}

#[tokio::test]
async fn test_send_rejects_malformed_body() {
    let service = Arc::new(MockProxyService::new());

    let response = app(&service)
        .oneshot(post_json("/topic/orders", "not json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(service.stored_count("orders").await, 0);
}

#[tokio::test]
async fn test_backend_failure_maps_to_bad_gateway() {
    let service = Arc::new(MockProxyService::new());
    service.set_fail_on_send(true).await;

    let response = app(&service)
        .oneshot(post_json("/topic/orders", r#"{"a":1}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["code"], serde_json::json!(502));
}
