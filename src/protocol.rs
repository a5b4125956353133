//! Downstream wire protocol: renderer-facing inbound actions and outbound
//! frames, plus the exchange→renderer execution-report normalization that
//! both the order dispatcher and the user-data supervisor share.

use crate::types::{Interval, Side, Symbol};
use serde_json::{json, Value};
use std::str::FromStr;

/// Parsed inbound frame, after translating legacy `request`-tagged messages
/// into the same shape as the `action`-tagged ones.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Subscribe {
        channel_id: String,
        channel_type: String,
        symbol: Symbol,
        interval: Interval,
        request_id: Option<String>,
    },
    Unsubscribe {
        channel_id: String,
    },
    EnableDepthView {
        symbol: Symbol,
    },
    DisableDepthView,
    Order {
        side: Side,
        symbol: Option<Symbol>,
        price: String,
        quantity: String,
    },
    CancelOrder {
        symbol: Symbol,
        order_id: Option<i64>,
        orig_client_order_id: Option<String>,
    },
}

fn field_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Parses one inbound JSON frame, handling both the `action`-tagged protocol
/// and the legacy `request`-tagged one. Returns `None` on anything
/// unrecognized or missing a required field; callers log at warn and drop.
pub fn parse_inbound(value: &Value) -> Option<Inbound> {
    if let Some(action) = value.get("action").and_then(|v| v.as_str()) {
        return parse_action(action, value);
    }
    if let Some(request) = value.get("request").and_then(|v| v.as_str()) {
        let data = value.get("data").cloned().unwrap_or(Value::Null);
        return parse_legacy(request, &data);
    }
    None
}

fn parse_action(action: &str, value: &Value) -> Option<Inbound> {
    match action {
        "subscribe" => {
            let channel_id = field_str(value, "channelId")?;
            let channel_type = field_str(value, "channelType")?;
            let symbol = field_str(value, "symbol")?;
            let interval = Interval::from_str(&field_str(value, "interval")?).ok()?;
            Some(Inbound::Subscribe {
                channel_id,
                channel_type,
                symbol,
                interval,
                request_id: field_str(value, "requestId"),
            })
        }
        "unsubscribe" => Some(Inbound::Unsubscribe {
            channel_id: field_str(value, "channelId")?,
        }),
        "enable_depth_view" => Some(Inbound::EnableDepthView {
            symbol: field_str(value, "symbol")?,
        }),
        "disable_depth_view" => Some(Inbound::DisableDepthView),
        "order" => {
            let side = Side::from_str(&field_str(value, "type")?).ok()?;
            Some(Inbound::Order {
                side,
                symbol: field_str(value, "symbol"),
                price: field_str(value, "price")?,
                quantity: field_str(value, "quantity")?,
            })
        }
        "cancelOrder" => Some(Inbound::CancelOrder {
            symbol: field_str(value, "symbol")?,
            order_id: value.get("orderId").and_then(|v| v.as_i64()),
            orig_client_order_id: field_str(value, "origClientOrderId"),
        }),
        _ => None,
    }
}

fn parse_legacy(request: &str, data: &Value) -> Option<Inbound> {
    match request {
        "chart" => {
            let symbol = field_str(data, "selected")?;
            let interval = Interval::from_str(&field_str(data, "interval")?).ok()?;
            let channel_id = crate::channel::channel_id(crate::channel::ChannelType::Detail, &symbol, interval);
            Some(Inbound::Subscribe {
                channel_id,
                channel_type: "detail".to_string(),
                symbol,
                interval,
                request_id: field_str(data, "requestId"),
            })
        }
        "buyOrder" | "sellOrder" => {
            let side = if request == "buyOrder" { Side::Buy } else { Side::Sell };
            Some(Inbound::Order {
                side,
                symbol: field_str(data, "symbol"),
                price: field_str(data, "price")?,
                quantity: field_str(data, "quantity")?,
            })
        }
        "cancelOrder" => Some(Inbound::CancelOrder {
            symbol: field_str(data, "symbol")?,
            order_id: data.get("orderId").and_then(|v| v.as_i64()),
            orig_client_order_id: field_str(data, "origClientOrderId"),
        }),
        _ => None,
    }
}

/// Outbound frame, built by every component that needs to talk to a
/// renderer. `to_value` applies the wire projection, including the legacy
/// `<type>:payload` duplication for global frames.
#[derive(Debug, Clone)]
pub enum Outbound {
    Channel {
        channel_id: String,
        msg_type: &'static str,
        symbol: Symbol,
        interval: Interval,
        payload: Value,
        extra: Option<Value>,
        request_id: Option<String>,
    },
    Global {
        msg_type: &'static str,
        payload: Value,
    },
}

impl Outbound {
    pub fn channel(
        channel_id: impl Into<String>,
        msg_type: &'static str,
        symbol: Symbol,
        interval: Interval,
        payload: Value,
    ) -> Self {
        Self::Channel {
            channel_id: channel_id.into(),
            msg_type,
            symbol,
            interval,
            payload,
            extra: None,
            request_id: None,
        }
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        if let Self::Channel { extra: slot, .. } = &mut self {
            *slot = Some(extra);
        }
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        if let Self::Channel { request_id: slot, .. } = &mut self {
            *slot = request_id;
        }
        self
    }

    pub fn global(msg_type: &'static str, payload: Value) -> Self {
        Self::Global { msg_type, payload }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Channel {
                channel_id,
                msg_type,
                symbol,
                interval,
                payload,
                extra,
                request_id,
            } => {
                let mut frame = json!({
                    "channelId": channel_id,
                    "type": msg_type,
                    "symbol": symbol,
                    "interval": interval.as_str(),
                    "payload": payload,
                });
                let obj = frame.as_object_mut().unwrap();
                if let Some(extra) = extra {
                    obj.insert("extra".to_string(), extra.clone());
                }
                if let Some(request_id) = request_id {
                    obj.insert("requestId".to_string(), json!(request_id));
                }
                frame
            }
            Self::Global { msg_type, payload } => {
                let mut frame = json!({
                    "channelId": "global",
                    "type": msg_type,
                    "payload": payload,
                });
                frame
                    .as_object_mut()
                    .unwrap()
                    .insert((*msg_type).to_string(), payload.clone());
                frame
            }
        }
    }
}

fn default_string_field(raw: &Value, key: &str, default: &str) -> String {
    raw.get(key)
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
        .unwrap_or_else(|| default.to_string())
}

/// Normalizes a raw `executionReport` user-data frame (or a synthesized
/// `OrderResponse`-shaped value) into a stable-key shape, filling in
/// defaults (`status` → `NEW`, numeric fields → `"0"`) for whichever keys
/// are missing.
pub fn normalize_execution_report(raw: &Value) -> Value {
    let status = default_string_field(raw, "X", &default_string_field(raw, "status", "NEW"));
    let order_status = default_string_field(raw, "x", &status);
    json!({
        "e": "executionReport",
        "s": default_string_field(raw, "s", &default_string_field(raw, "symbol", "")),
        "symbol": default_string_field(raw, "symbol", &default_string_field(raw, "s", "")),
        "S": default_string_field(raw, "S", &default_string_field(raw, "side", "")),
        "side": default_string_field(raw, "side", &default_string_field(raw, "S", "")),
        "o": default_string_field(raw, "o", &default_string_field(raw, "type", "LIMIT")),
        "type": default_string_field(raw, "type", &default_string_field(raw, "o", "LIMIT")),
        "x": order_status,
        "X": status,
        "status": default_string_field(raw, "status", &status),
        "i": default_string_field(raw, "i", &default_string_field(raw, "orderId", "0")),
        "orderId": default_string_field(raw, "orderId", &default_string_field(raw, "i", "0")),
        "p": default_string_field(raw, "p", &default_string_field(raw, "price", "0")),
        "price": default_string_field(raw, "price", &default_string_field(raw, "p", "0")),
        "q": default_string_field(raw, "q", &default_string_field(raw, "origQty", "0")),
        "origQty": default_string_field(raw, "origQty", &default_string_field(raw, "q", "0")),
        "z": default_string_field(raw, "z", &default_string_field(raw, "executedQty", "0")),
        "l": default_string_field(raw, "l", "0"),
        "T": default_string_field(raw, "T", &default_string_field(raw, "transactTime", "0")),
        "transactTime": default_string_field(raw, "transactTime", &default_string_field(raw, "T", "0")),
        "time": default_string_field(raw, "time", &default_string_field(raw, "T", "0")),
    })
}
