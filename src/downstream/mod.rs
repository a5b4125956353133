//! Accepts renderer connections, dispatches inbound actions, and emits
//! typed outbound messages.
//!
//! Splits the socket into sender/receiver halves, drives each with its own
//! task, and tears both down with `tokio::select!` + mutual `.abort()` on
//! either side completing.

use crate::broker::Broker;
use crate::channel::ChannelType;
use crate::channel_manager::ChannelManager;
use crate::market_stream::MarketStreamManager;
use crate::protocol::{parse_inbound, Inbound};
use crate::order_dispatcher;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

const OUTBOUND_BUFFER: usize = 256;

pub fn router(broker: Arc<Broker>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(broker)
}

async fn ws_handler(State(broker): State<Arc<Broker>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, broker))
}

async fn handle_socket(socket: WebSocket, broker: Arc<Broker>) {
    broker.register_renderer().await;

    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let (market_events_tx, market_events_rx) = mpsc::unbounded_channel();

    let market_stream = MarketStreamManager::new(
        market_events_tx,
        broker.ws_base_url(),
        broker.proxy(),
        broker.connect_gate(),
    );
    let channel_manager = ChannelManager::new(market_stream, broker.client(), outbound_tx.clone());
    let router_task = channel_manager.clone().spawn_market_event_router(market_events_rx);

    let mut global_rx = broker.subscribe_global();
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    match msg {
                        Some(frame) => {
                            if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                msg = global_rx.recv() => {
                    match msg {
                        Ok(frame) => {
                            if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "renderer lagged on global broadcast");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    let dispatch_channel_manager = channel_manager.clone();
    let dispatch_outbound = outbound_tx.clone();
    let dispatch_client = broker.client();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    dispatch_inbound(&text, &dispatch_channel_manager, dispatch_outbound.clone(), dispatch_client.clone()).await;
                }
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    router_task.abort();
    channel_manager.cleanup().await;
    broker.unregister_renderer().await;
}

async fn dispatch_inbound(
    text: &str,
    channel_manager: &Arc<ChannelManager>,
    outbound: mpsc::Sender<serde_json::Value>,
    client: Option<Arc<crate::binance::client::RateLimitedClient>>,
) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%err, "dropping malformed inbound frame");
            return;
        }
    };

    let Some(inbound) = parse_inbound(&value) else {
        tracing::warn!(frame = %text, "dropping unrecognized inbound frame");
        return;
    };

    match inbound {
        Inbound::Subscribe { channel_id, channel_type, symbol, interval, request_id } => {
            let Ok(channel_type) = ChannelType::from_str(&channel_type) else {
                tracing::warn!(channel_type, "dropping subscribe with invalid channelType");
                return;
            };
            let symbol = symbol.to_uppercase();
            channel_manager.subscribe(channel_id, channel_type, symbol, interval, request_id).await;
        }
        Inbound::Unsubscribe { channel_id } => {
            channel_manager.unsubscribe(&channel_id).await;
        }
        Inbound::EnableDepthView { symbol } => {
            channel_manager.enable_depth_view(&symbol.to_uppercase()).await;
        }
        Inbound::DisableDepthView => {
            channel_manager.disable_depth_view().await;
        }
        Inbound::Order { side, symbol, price, quantity } => {
            let symbol = match symbol.map(|s| s.to_uppercase()) {
                Some(symbol) => Some(symbol),
                None => channel_manager.last_selected_symbol().await,
            };
            order_dispatcher::handle_order(client, outbound, side, symbol, price, quantity).await;
        }
        Inbound::CancelOrder { symbol, order_id, orig_client_order_id } => {
            order_dispatcher::handle_cancel_order(client, outbound, symbol.to_uppercase(), order_id, orig_client_order_id).await;
        }
    }
}
