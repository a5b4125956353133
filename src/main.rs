//! Market data broker entry point.
//!
//! Loads configuration from the environment, starts structured logging with
//! secret redaction, and serves the downstream renderer-facing WebSocket.

use market_broker::config::BrokerConfig;
use market_broker::{broker::Broker, downstream, logging};
use std::net::SocketAddr;

#[tokio::main]
async fn main() {
    let config = BrokerConfig::from_env();

    let secrets = config
        .credentials
        .as_ref()
        .map(|c| vec![c.api_key.expose_secret().to_string(), c.secret_key.expose_secret().to_string()])
        .unwrap_or_default();
    logging::init(&config.log_level, secrets);

    if config.is_mock_mode() {
        tracing::warn!("no exchange credentials found (BK/BS unset); running in mock mode");
    }

    let broker = Broker::new(&config);
    let app = downstream::router(broker);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.ws_port));
    tracing::info!(%addr, "market broker listening");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind downstream port");
    axum::serve(listener, app).await.expect("server error");
}
