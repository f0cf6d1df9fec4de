//! kafgate: HTTP proxy for Kafka topics.
//!
//! Publishes JSON objects and serves bulk consumes over plain HTTP while
//! holding broker sessions open across requests.
//!
//! ## Configuration
//!
//! Read from an optional `config.yaml` (or the file named by
//! `KAFGATE_CONFIG`, or the first CLI argument) with `KAFGATE`-prefixed
//! environment overrides:
//! - `brokers`: Kafka bootstrap servers, comma-separated
//! - `backend`: client strategy, "direct" or "stream"
//! - `read_timeout`: consume deadline in seconds
//! - `address` / `port`: HTTP listen address

use tracing::{error, info};

use kafgate::api;
use kafgate::config::Config;
use kafgate::service::init_service;
use kafgate::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("failed to load configuration: {}", e);
        e
    })?;

    info!(
        name = %config.name,
        brokers = %config.brokers,
        backend = %config.backend,
        "starting kafgate"
    );

    // An unknown backend must fail here, before the listener opens.
    let service = init_service(&config).map_err(|e| {
        error!("failed to initialize backend: {}", e);
        e
    })?;

    api::serve(&config, service).await?;

    info!("kafgate stopped");
    Ok(())
}
