//! End-to-end coverage of the broker's process-level scenarios: order
//! placement and last-renderer teardown.
//!
//! Stream deduplication and depth-view toggling are exercised end to end
//! already, at the `MarketStreamManager` unit-test level
//! (`dedup_same_stream_from_two_channels`, `depth_view_adds_trade_and_depth_streams`
//! in `src/market_stream.rs`) — driving them through a live upstream socket
//! here would only re-assert the same stream-set arithmetic behind a slower,
//! flakier network round trip. Likewise rate-limiter back-off and transient
//! retry-then-success are covered in `src/rate_limiter.rs`
//! (`weight_cap_never_exceeded_in_window`, `spacing_enforced_between_calls`,
//! `retries_up_to_bound_then_succeeds`). This file covers order placement
//! and renderer teardown, which need a real server process and a real
//! (mocked) exchange to be meaningful.

mod common;

use common::fixtures::{mock_broker_config, spawn_test_server};
use common::init_test_env;
use futures_util::{SinkExt, StreamExt};
use market_broker::binance::client::{BinanceClient, RateLimitedClient};
use market_broker::config::credentials::{Credentials, SecretString};
use market_broker::order_dispatcher;
use market_broker::rate_limiter::RateLimiterConfig;
use market_broker::types::Side;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_credentials() -> Credentials {
    Credentials {
        api_key: SecretString::new("test-key".to_string()),
        secret_key: SecretString::new("test-secret".to_string()),
    }
}

/// Order placement against a mocked exchange. The dispatcher issues
/// a LIMIT/GTC order with the exact submitted strings, emits
/// `execution_update{x:"NEW", status:"NEW", symbol:"BTCUSDT", side:"BUY"}`,
/// then refreshes balances/open orders/trade history.
#[tokio::test]
async fn order_placement_emits_execution_update_then_refreshes_account_state() {
    init_test_env();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v3/order"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "symbol": "BTCUSDT",
            "orderId": 42,
            "clientOrderId": "abc123",
            "price": "12346",
            "origQty": "0.1",
            "executedQty": "0.0",
            "status": "NEW",
            "side": "BUY",
            "type": "LIMIT",
            "transactTime": 1_700_000_000_000i64,
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "balances": [{"asset": "BTC", "free": "1.0", "locked": "0.0"}],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/openOrders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/myTrades"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let binance_client = BinanceClient::new(server.uri(), Some(mock_credentials()), None);
    let client = Arc::new(RateLimitedClient::new(binance_client, RateLimiterConfig::default()));
    let (outbound_tx, mut outbound_rx) = mpsc::channel(16);

    order_dispatcher::handle_order(
        Some(client),
        outbound_tx,
        Side::Buy,
        Some("BTCUSDT".to_string()),
        "12346".to_string(),
        "0.1".to_string(),
    )
    .await;

    let execution_update = outbound_rx.recv().await.expect("expected execution_update");
    assert_eq!(execution_update["type"], "execution_update");
    assert_eq!(execution_update["payload"]["x"], "NEW");
    assert_eq!(execution_update["payload"]["status"], "NEW");
    assert_eq!(execution_update["payload"]["symbol"], "BTCUSDT");
    assert_eq!(execution_update["payload"]["side"], "BUY");

    let balances = outbound_rx.recv().await.expect("expected balances refresh");
    assert_eq!(balances["type"], "balances");
    let orders = outbound_rx.recv().await.expect("expected orders refresh");
    assert_eq!(orders["type"], "orders");
    let history = outbound_rx.recv().await.expect("expected history refresh");
    assert_eq!(history["type"], "history");
}

/// Last-renderer teardown. Two renderers connect; the first
/// disconnecting leaves the renderer count at one (upstream sockets stay
/// up); the second disconnecting drops it to zero (supervisors torn down).
#[tokio::test]
async fn renderer_count_reaches_zero_only_after_both_disconnect() {
    init_test_env();
    let (url, broker) = spawn_test_server(&mock_broker_config()).await;

    let (mut first, _) = tokio_tungstenite::connect_async(&url).await.expect("renderer 1 connect failed");
    let (mut second, _) = tokio_tungstenite::connect_async(&url).await.expect("renderer 2 connect failed");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.renderer_count(), 2);

    first.close(None).await.ok();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(broker.renderer_count(), 1, "one renderer remains connected");

    second.close(None).await.ok();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(broker.renderer_count(), 0, "last renderer disconnecting tears everything down");
}

/// Sanity check that the downstream server rejects nothing structurally
/// odd about a bare connect/disconnect with no frames exchanged.
#[tokio::test]
async fn connect_then_immediate_close_leaves_no_renderer_behind() {
    init_test_env();
    let (url, broker) = spawn_test_server(&mock_broker_config()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.expect("connect failed");
    ws.send(Message::Close(None)).await.ok();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(broker.renderer_count(), 0);
}
