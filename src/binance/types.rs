//! Exchange REST/WebSocket wire types.
//!
//! All types include validation and proper deserialization. Field renames
//! follow the exchange's compact on-the-wire keys (`s`, `p`, `q`, ...).

use serde::{Deserialize, Serialize};

/// Response from the exchange's `/api/v3/time` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimeResponse {
    pub server_time: i64,
}

impl ServerTimeResponse {
    pub fn is_valid(&self) -> bool {
        self.server_time > 0
    }

    pub fn time_ms(&self) -> i64 {
        self.server_time
    }
}

/// `exchangeInfo` symbol filter subset the broker's `filters` message needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    #[serde(rename = "baseAsset")]
    pub base_asset: String,
    #[serde(rename = "quoteAsset")]
    pub quote_asset: String,
    #[serde(rename = "baseAssetPrecision")]
    pub base_asset_precision: u32,
    #[serde(rename = "quoteAssetPrecision")]
    pub quote_asset_precision: u32,
    pub filters: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepthSnapshotResponse {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<(String, String)>,
    pub asks: Vec<(String, String)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KlineRow(
    pub i64,    // open time (ms)
    pub String, // open
    pub String, // high
    pub String, // low
    pub String, // close
    pub String, // volume
    pub i64,    // close time (ms)
    #[serde(default)] pub serde_json::Value, // quote asset volume
    #[serde(default)] pub serde_json::Value, // number of trades
    #[serde(default)] pub serde_json::Value, // taker buy base volume
    #[serde(default)] pub serde_json::Value, // taker buy quote volume
    #[serde(default)] pub serde_json::Value, // ignore
);

impl KlineRow {
    pub fn to_candle(&self, is_final: bool) -> crate::types::Candle {
        crate::types::Candle {
            time: self.0 / 1000,
            open: self.1.parse().unwrap_or(0.0),
            high: self.2.parse().unwrap_or(0.0),
            low: self.3.parse().unwrap_or(0.0),
            close: self.4.parse().unwrap_or(0.0),
            volume: self.5.parse().unwrap_or(0.0),
            is_final,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub balances: Vec<BalanceEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalanceEntry {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderResponse {
    pub symbol: String,
    #[serde(rename = "orderId")]
    pub order_id: i64,
    #[serde(rename = "clientOrderId")]
    pub client_order_id: String,
    #[serde(default)]
    pub price: String,
    #[serde(rename = "origQty", default)]
    pub orig_qty: String,
    #[serde(rename = "executedQty", default)]
    pub executed_qty: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub side: String,
    #[serde(rename = "type", default)]
    pub order_type: String,
    #[serde(rename = "transactTime", default)]
    pub transact_time: i64,
}

fn default_status() -> String {
    "NEW".to_string()
}

/// A row from `GET /api/v3/myTrades` (the signed account trade history).
/// Unlike the public trades feed, this response does include `symbol`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradeEntry {
    pub id: i64,
    pub symbol: String,
    pub price: String,
    pub qty: String,
    pub time: i64,
}

/// A row from the public `GET /api/v3/trades` endpoint. No `symbol` field
/// is present on the wire (the caller already knows it, having asked for
/// it), so this is a distinct type from `TradeEntry` rather than a shared
/// one with a field that never deserializes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublicTradeEntry {
    #[serde(default)]
    pub id: i64,
    pub price: String,
    pub qty: String,
    pub time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    pub listen_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_time_deserialization() {
        let json = r#"{"serverTime": 1699564800000}"#;
        let response: ServerTimeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.server_time, 1699564800000);
        assert!(response.is_valid());
    }

    #[test]
    fn test_invalid_server_time() {
        let response = ServerTimeResponse { server_time: -1 };
        assert!(!response.is_valid());
    }

    #[test]
    fn kline_row_converts_to_candle() {
        let json = r#"[1609459200000,"29000.0","29500.0","28900.0","29300.0","120.5",1609462799999,"0","0","0","0","0"]"#;
        let row: KlineRow = serde_json::from_str(json).unwrap();
        let candle = row.to_candle(true);
        assert_eq!(candle.time, 1609459200);
        assert_eq!(candle.open, 29000.0);
        assert!(candle.is_final);
    }

    #[test]
    fn order_response_defaults_status_to_new() {
        let json = r#"{"symbol":"BTCUSDT","orderId":1,"clientOrderId":"c1"}"#;
        let resp: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status, "NEW");
    }
}
