//! Test fixtures for the downstream WebSocket server
//!
//! Provides a mock-mode `BrokerConfig` builder and a helper that spawns the
//! full `downstream::router` on an ephemeral port, mirroring how
//! `main.rs` wires `Broker` to `axum::serve`.

use market_broker::broker::Broker;
use market_broker::config::BrokerConfig;
use market_broker::downstream;
use std::sync::Arc;

/// A `BrokerConfig` with no credentials, selecting mock mode — no REST/WS
/// calls reach a real exchange.
pub fn mock_broker_config() -> BrokerConfig {
    BrokerConfig {
        ws_port: 0,
        log_level: "info".to_string(),
        credentials: None,
        proxy: None,
    }
}

/// Spawns the downstream server on a loopback ephemeral port and returns
/// its `ws://` URL together with the `Broker` handle backing it.
pub async fn spawn_test_server(config: &BrokerConfig) -> (String, Arc<Broker>) {
    let broker = Broker::new(config);
    let app = downstream::router(broker.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind ephemeral test port");
    let addr = listener.local_addr().expect("listener has no local address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (format!("ws://{addr}/"), broker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_config_has_no_credentials() {
        let config = mock_broker_config();
        assert!(config.is_mock_mode());
    }

    #[tokio::test]
    async fn spawn_test_server_binds_a_reachable_port() {
        let (url, broker) = spawn_test_server(&mock_broker_config()).await;
        assert!(url.starts_with("ws://127.0.0.1:"));
        assert_eq!(broker.renderer_count(), 0);
    }
}
