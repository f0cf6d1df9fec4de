//! HTTP surface.
//!
//! Thin routing and marshaling over the proxy service: publish and consume
//! endpoints plus a status probe. All broker behavior lives behind
//! [`ProxyService`].

mod error;
mod handlers;

pub use error::ApiError;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::service::ProxyService;

/// Shared handler state.
pub type SharedService = Arc<dyn ProxyService>;

/// Build the application router.
pub fn router(service: SharedService) -> Router {
    // POST interprets the trailing segment as a message key, GET as a
    // consumer group.
    Router::new()
        .route("/status", get(handlers::status))
        .route("/topic/:topic", post(handlers::send))
        .route(
            "/topic/:topic/:selector",
            post(handlers::send_with_key).get(handlers::retrieve),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Serve the router until interrupted.
pub async fn serve(config: &Config, service: SharedService) -> std::io::Result<()> {
    let app = router(service);
    let addr = config.bind_addr();

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}

#[cfg(test)]
mod tests;
