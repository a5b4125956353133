//! Error handling integration tests
//!
//! Exercises the "invalid renderer input" policy end to end: the
//! downstream server drops malformed or incomplete frames silently (warn
//! log, no crash, connection stays open) rather than closing the socket or
//! echoing a protocol error.

use crate::common::fixtures::{mock_broker_config, spawn_test_server};
use crate::common::init_test_env;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

async fn connect(url: &str) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let (stream, _response) = tokio_tungstenite::connect_async(url).await.expect("failed to connect to test server");
    stream
}

/// Malformed JSON is dropped; the connection is not closed and later valid
/// frames are still processed.
#[tokio::test]
async fn malformed_json_frame_is_dropped_without_closing_connection() {
    init_test_env();
    let (url, _broker) = spawn_test_server(&mock_broker_config()).await;
    let mut ws = connect(&url).await;

    ws.send(Message::Text("not json at all".into())).await.unwrap();

    ws.send(
        Message::Text(
            serde_json::json!({
                "action": "order",
                "type": "buy",
                "symbol": "BTCUSDT",
                "price": "12346",
                "quantity": "0.1",
            })
            .to_string()
            .into(),
        ),
    )
    .await
    .unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("expected execution_update after the malformed frame")
        .expect("stream closed unexpectedly")
        .expect("websocket error");
    let Message::Text(text) = msg else {
        panic!("expected a text frame");
    };
    let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(frame["type"], "execution_update");
}

/// A subscribe action missing a required field (`interval`) is dropped;
/// no `chart` frame is ever emitted for it.
#[tokio::test]
async fn subscribe_missing_interval_is_dropped() {
    init_test_env();
    let (url, _broker) = spawn_test_server(&mock_broker_config()).await;
    let mut ws = connect(&url).await;

    ws.send(
        Message::Text(
            serde_json::json!({
                "action": "subscribe",
                "channelId": "mini-1",
                "channelType": "mini",
                "symbol": "BTCUSDT",
            })
            .to_string()
            .into(),
        ),
    )
    .await
    .unwrap();

    let result = tokio::time::timeout(Duration::from_millis(500), ws.next()).await;
    assert!(result.is_err(), "no frame should arrive for an invalid subscribe");
}

/// An `order` action with no symbol is rejected by validation before any
/// exchange call is attempted; no `execution_update` follows.
#[tokio::test]
async fn order_missing_symbol_emits_nothing() {
    init_test_env();
    let (url, _broker) = spawn_test_server(&mock_broker_config()).await;
    let mut ws = connect(&url).await;

    ws.send(
        Message::Text(
            serde_json::json!({
                "action": "order",
                "type": "buy",
                "price": "1",
                "quantity": "1",
            })
            .to_string()
            .into(),
        ),
    )
    .await
    .unwrap();

    let result = tokio::time::timeout(Duration::from_millis(500), ws.next()).await;
    assert!(result.is_err(), "no execution_update should follow a symbol-less order");
}

/// An `order` action with no symbol falls back to the renderer's last
/// subscribed symbol instead of being rejected.
#[tokio::test]
async fn order_missing_symbol_falls_back_to_last_selected_symbol() {
    init_test_env();
    let (url, _broker) = spawn_test_server(&mock_broker_config()).await;
    let mut ws = connect(&url).await;

    ws.send(
        Message::Text(
            serde_json::json!({
                "action": "subscribe",
                "channelId": "mini-1",
                "channelType": "mini",
                "symbol": "ETHUSDT",
                "interval": "1h",
            })
            .to_string()
            .into(),
        ),
    )
    .await
    .unwrap();

    ws.send(
        Message::Text(
            serde_json::json!({
                "action": "order",
                "type": "buy",
                "price": "1",
                "quantity": "1",
            })
            .to_string()
            .into(),
        ),
    )
    .await
    .unwrap();

    let frame = loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("expected an execution_update for the symbol-less order")
            .expect("stream closed unexpectedly")
            .expect("websocket error");
        let Message::Text(text) = msg else {
            panic!("expected a text frame");
        };
        let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
        if frame["type"] == "execution_update" {
            break frame;
        }
    };
    assert_eq!(frame["payload"]["symbol"], "ETHUSDT");
}

/// An unrecognized `channelType` on subscribe is dropped; the connection
/// survives and later valid input is still served.
#[tokio::test]
async fn subscribe_invalid_channel_type_is_dropped() {
    init_test_env();
    let (url, _broker) = spawn_test_server(&mock_broker_config()).await;
    let mut ws = connect(&url).await;

    ws.send(
        Message::Text(
            serde_json::json!({
                "action": "subscribe",
                "channelId": "mini-1",
                "channelType": "not-a-real-type",
                "symbol": "BTCUSDT",
                "interval": "1h",
            })
            .to_string()
            .into(),
        ),
    )
    .await
    .unwrap();

    ws.send(
        Message::Text(
            serde_json::json!({
                "action": "cancelOrder",
                "symbol": "BTCUSDT",
                "orderId": 1,
            })
            .to_string()
            .into(),
        ),
    )
    .await
    .unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("connection should survive the invalid channelType")
        .expect("stream closed unexpectedly")
        .expect("websocket error");
    let Message::Text(text) = msg else {
        panic!("expected a text frame");
    };
    let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(frame["type"], "execution_update");
}
