//! Validates and submits orders/cancellations, normalizes execution reports.

use crate::binance::client::RateLimitedClient;
use crate::binance::types::OrderResponse;
use crate::protocol::{normalize_execution_report, Outbound};
use crate::types::Side;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

const OPEN_ORDERS_LIMIT_TRADES: u32 = 500;

fn send_outbound(outbound: &mpsc::Sender<Value>, frame: Value) {
    if outbound.try_send(frame).is_err() {
        tracing::warn!("renderer outbound buffer full, dropping frame");
    }
}

fn parse_positive_decimal(value: &str) -> Option<f64> {
    let parsed: f64 = value.parse().ok()?;
    if parsed.is_finite() && parsed > 0.0 {
        Some(parsed)
    } else {
        None
    }
}

fn order_response_to_value(resp: &OrderResponse) -> Value {
    json!({
        "s": resp.symbol,
        "symbol": resp.symbol,
        "S": resp.side,
        "side": resp.side,
        "o": resp.order_type,
        "type": resp.order_type,
        "x": resp.status,
        "X": resp.status,
        "status": resp.status,
        "i": resp.order_id,
        "orderId": resp.order_id,
        "p": resp.price,
        "price": resp.price,
        "q": resp.orig_qty,
        "origQty": resp.orig_qty,
        "z": resp.executed_qty,
        "T": resp.transact_time,
        "transactTime": resp.transact_time,
        "time": resp.transact_time,
    })
}

/// Handles an `order` action: validates, submits LIMIT/GTC at
/// `newOrderRespType=FULL`, emits `execution_update` on success and
/// `order_error` on rejection, then refreshes account state.
pub async fn handle_order(
    client: Option<Arc<RateLimitedClient>>,
    outbound: mpsc::Sender<Value>,
    side: Side,
    symbol: Option<String>,
    price: String,
    quantity: String,
) {
    let Some(symbol) = symbol.filter(|s| !s.is_empty()) else {
        tracing::warn!("order rejected: missing symbol");
        return;
    };
    if parse_positive_decimal(&quantity).is_none() {
        tracing::warn!(symbol, quantity, "order rejected: invalid quantity");
        return;
    }
    if parse_positive_decimal(&price).is_none() {
        tracing::warn!(symbol, price, "order rejected: invalid price");
        return;
    }

    let Some(client) = client else {
        let mut raw = json!({
            "s": symbol, "S": side.to_string(), "o": "LIMIT", "x": "NEW", "X": "NEW",
            "i": 0, "p": price, "q": quantity,
        });
        raw["symbol"] = json!(symbol);
        send_outbound(&outbound, Outbound::global("execution_update", normalize_execution_report(&raw)).to_value());
        return;
    };

    match client.new_order(&symbol, side, &price, &quantity, None).await {
        Ok(resp) => {
            let raw = order_response_to_value(&resp);
            send_outbound(&outbound, Outbound::global("execution_update", normalize_execution_report(&raw)).to_value());
            refresh_account_state(&client, &outbound, &symbol).await;
        }
        Err(err) => {
            tracing::error!(%err, symbol, "order rejected by exchange");
            send_outbound(
                &outbound,
                Outbound::global("order_error", json!({"reason": "exchange_reject", "detail": err.to_string()})).to_value(),
            );
        }
    }
}

/// Handles a `cancelOrder` action: requires symbol plus `orderId` or
/// `origClientOrderId`.
pub async fn handle_cancel_order(
    client: Option<Arc<RateLimitedClient>>,
    outbound: mpsc::Sender<Value>,
    symbol: String,
    order_id: Option<i64>,
    orig_client_order_id: Option<String>,
) {
    if symbol.is_empty() {
        tracing::warn!("cancelOrder rejected: missing symbol");
        return;
    }
    if order_id.is_none() && orig_client_order_id.is_none() {
        tracing::warn!(symbol, "cancelOrder rejected: missing orderId/origClientOrderId");
        return;
    }

    let Some(client) = client else {
        let mut raw = json!({"s": symbol, "x": "CANCELED", "X": "CANCELED", "i": order_id.unwrap_or(0)});
        raw["symbol"] = json!(symbol);
        send_outbound(&outbound, Outbound::global("execution_update", normalize_execution_report(&raw)).to_value());
        return;
    };

    match client.cancel_order(&symbol, order_id, orig_client_order_id.as_deref()).await {
        Ok(mut resp) => {
            resp.status = "CANCELED".to_string();
            let raw = order_response_to_value(&resp);
            send_outbound(&outbound, Outbound::global("execution_update", normalize_execution_report(&raw)).to_value());
            refresh_account_state(&client, &outbound, &symbol).await;
        }
        Err(err) => {
            tracing::error!(%err, symbol, "cancelOrder rejected by exchange");
            send_outbound(
                &outbound,
                Outbound::global("order_error", json!({"reason": "exchange_reject", "detail": err.to_string()})).to_value(),
            );
        }
    }
}

async fn refresh_account_state(client: &Arc<RateLimitedClient>, outbound: &mpsc::Sender<Value>, symbol: &str) {
    match client.get_account().await {
        Ok(account) => {
            let balances: Vec<_> = account
                .balances
                .into_iter()
                .filter(|b| (b.free != "0" && b.free != "0.00000000") || (b.locked != "0" && b.locked != "0.00000000"))
                .collect();
            send_outbound(outbound, Outbound::global("balances", json!(balances)).to_value());
        }
        Err(err) => tracing::error!(%err, "post-order getAccount refresh failed"),
    }

    match client.get_open_orders(Some(symbol)).await {
        Ok(orders) => send_outbound(outbound, Outbound::global("orders", json!(orders)).to_value()),
        Err(err) => tracing::error!(%err, symbol, "post-order getOpenOrders refresh failed"),
    }

    match client.my_trades(symbol, OPEN_ORDERS_LIMIT_TRADES).await {
        Ok(history) => send_outbound(outbound, Outbound::global("history", json!(history)).to_value()),
        Err(err) => tracing::error!(%err, symbol, "post-order myTrades refresh failed"),
    }
}
