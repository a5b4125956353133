//! Upstream WebSocket connect helpers and frame decoding.
//!
//! Three socket kinds share the combined-stream wire format: the market
//! socket (klines/trade/depth, owned by `MarketStreamManager`), the ticker
//! socket (`!ticker@arr`, owned by the ticker supervisor) and the user-data
//! socket (listen key, owned by the user-data supervisor). Each gets its own
//! connect helper here; parsing stays close to the connect call since the
//! combined-stream envelope differs slightly between raw-stream and
//! array-stream subscriptions.

use crate::config::ProxyConfig;
use crate::depth_cache::DepthUpdate;
use crate::error::BrokerError;
use crate::market_stream::UpstreamMarketEvent;
use crate::types::Interval;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect_ws(url: &str, proxy: Option<&ProxyConfig>) -> Result<Socket, BrokerError> {
    match proxy {
        Some(proxy) => crate::net::proxy::connect_via_proxy(url, proxy).await,
        None => {
            let (socket, _response) = connect_async(url).await?;
            Ok(socket)
        }
    }
}

fn close_code_is_abnormal(frame: Option<&tokio_tungstenite::tungstenite::protocol::CloseFrame>) -> bool {
    match frame {
        None => true,
        Some(frame) => u16::from(frame.code) != 1000,
    }
}

/// A live connection to the consolidated market stream. Each `run` call
/// drains frames until the socket closes, returning `true` if it closed
/// abnormally (callers use this to decide whether to reconnect).
pub struct MarketSocketHandle {
    socket: Socket,
}

pub async fn connect_market_stream(
    base_url: &str,
    streams: &[String],
    proxy: Option<&ProxyConfig>,
) -> Result<MarketSocketHandle, BrokerError> {
    if streams.is_empty() {
        return Err(BrokerError::bad_request("no streams requested"));
    }
    let url = format!("{base_url}/stream?streams={}", streams.join("/"));
    let socket = connect_ws(&url, proxy).await?;
    Ok(MarketSocketHandle { socket })
}

#[derive(Debug, Deserialize)]
struct CombinedEnvelope {
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "k")]
    kline: KlineInner,
}

#[derive(Debug, Deserialize)]
struct KlineInner {
    #[serde(rename = "t")]
    start_time_ms: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_final: bool,
    #[serde(rename = "i")]
    interval: String,
}

#[derive(Debug, Deserialize)]
struct TradePayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: i64,
}

#[derive(Debug, Deserialize)]
struct DepthPayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "b")]
    bids: Vec<(String, String)>,
    #[serde(rename = "a")]
    asks: Vec<(String, String)>,
}

fn stream_symbol(stream_name: &str) -> String {
    stream_name
        .split('@')
        .next()
        .unwrap_or(stream_name)
        .to_uppercase()
}

fn decode_frame(envelope: CombinedEnvelope) -> Option<UpstreamMarketEvent> {
    let event_type = envelope.data.get("e").and_then(|v| v.as_str())?;
    match event_type {
        "kline" => {
            let payload: KlinePayload = serde_json::from_value(envelope.data).ok()?;
            let interval: Interval = payload.kline.interval.parse().ok()?;
            let candle = crate::types::Candle {
                time: payload.kline.start_time_ms / 1000,
                open: payload.kline.open.parse().ok()?,
                high: payload.kline.high.parse().ok()?,
                low: payload.kline.low.parse().ok()?,
                close: payload.kline.close.parse().ok()?,
                volume: payload.kline.volume.parse().ok()?,
                is_final: payload.kline.is_final,
            };
            Some(UpstreamMarketEvent::Kline {
                stream_name: envelope.stream,
                symbol: stream_symbol(&envelope.stream),
                interval,
                candle,
            })
        }
        "trade" => {
            let payload: TradePayload = serde_json::from_value(envelope.data).ok()?;
            Some(UpstreamMarketEvent::Trade {
                symbol: payload.symbol,
                price: payload.price,
                quantity: payload.quantity,
                trade_time: payload.trade_time,
            })
        }
        "depthUpdate" => {
            let payload: DepthPayload = serde_json::from_value(envelope.data).ok()?;
            Some(UpstreamMarketEvent::DepthUpdate {
                symbol: payload.symbol,
                update: DepthUpdate {
                    final_update_id: payload.final_update_id,
                    bids: payload.bids,
                    asks: payload.asks,
                },
            })
        }
        other => {
            tracing::debug!(event_type = other, "unrecognized market stream event");
            None
        }
    }
}

impl MarketSocketHandle {
    /// Drains frames, forwarding decoded events over `tx`, until the socket
    /// closes or errors. Returns `true` for an abnormal close (any close code
    /// other than 1000, or a transport error) so the caller knows to
    /// reconnect.
    pub async fn run(mut self, tx: mpsc::UnboundedSender<UpstreamMarketEvent>) -> bool {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<CombinedEnvelope>(&text) {
                    Ok(envelope) => {
                        if let Some(event) = decode_frame(envelope) {
                            let _ = tx.send(event);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%err, "failed to parse market stream frame");
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.socket.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    return close_code_is_abnormal(frame.as_ref());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(%err, "market socket read error");
                    return true;
                }
                None => return true,
            }
        }
    }
}

/// Decoded `!ticker@arr` frame: only symbols the ticker supervisor keeps
/// (those containing `BTC` or `USDT`) are forwarded to the `TickerCache`.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerArrEntry {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub last_price: String,
    #[serde(rename = "P")]
    pub price_change_percent: String,
}

pub struct TickerSocketHandle {
    socket: Socket,
}

pub async fn connect_ticker_stream(base_url: &str, proxy: Option<&ProxyConfig>) -> Result<TickerSocketHandle, BrokerError> {
    let url = format!("{base_url}/ws/!ticker@arr");
    let socket = connect_ws(&url, proxy).await?;
    Ok(TickerSocketHandle { socket })
}

impl TickerSocketHandle {
    pub async fn run(mut self, tx: mpsc::UnboundedSender<Vec<TickerArrEntry>>) -> bool {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Vec<TickerArrEntry>>(&text) {
                    Ok(entries) => {
                        let _ = tx.send(entries);
                    }
                    Err(err) => {
                        tracing::warn!(%err, "failed to parse ticker array frame");
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.socket.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    return close_code_is_abnormal(frame.as_ref());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(%err, "ticker socket read error");
                    return true;
                }
                None => return true,
            }
        }
    }
}

pub struct UserDataSocketHandle {
    socket: Socket,
}

pub async fn connect_user_data_stream(
    base_url: &str,
    listen_key: &str,
    proxy: Option<&ProxyConfig>,
) -> Result<UserDataSocketHandle, BrokerError> {
    let url = format!("{base_url}/ws/{listen_key}");
    let socket = connect_ws(&url, proxy).await?;
    Ok(UserDataSocketHandle { socket })
}

impl UserDataSocketHandle {
    /// Forwards raw JSON values; the user-data supervisor owns the
    /// `executionReport`/`outboundAccountPosition` classification since it
    /// needs access to the renderer's order bookkeeping.
    pub async fn run(mut self, tx: mpsc::UnboundedSender<serde_json::Value>) -> bool {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(value) => {
                        let _ = tx.send(value);
                    }
                    Err(err) => {
                        tracing::warn!(%err, "failed to parse user data frame");
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.socket.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    return close_code_is_abnormal(frame.as_ref());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(%err, "user data socket read error");
                    return true;
                }
                None => return true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_kline_envelope() {
        let raw = r#"{"stream":"btcusdt@kline_1h","data":{"e":"kline","E":1,"s":"BTCUSDT","k":{"t":1609459200000,"T":1609462799999,"s":"BTCUSDT","i":"1h","o":"29000.0","c":"29300.0","h":"29500.0","l":"28900.0","v":"120.5","x":true}}}"#;
        let envelope: CombinedEnvelope = serde_json::from_str(raw).unwrap();
        let event = decode_frame(envelope).unwrap();
        match event {
            UpstreamMarketEvent::Kline { symbol, candle, .. } => {
                assert_eq!(symbol, "BTCUSDT");
                assert!(candle.is_final);
                assert_eq!(candle.time, 1609459200);
            }
            _ => panic!("expected kline event"),
        }
    }

    #[test]
    fn decodes_trade_envelope() {
        let raw = r#"{"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT","p":"50000.0","q":"0.01","T":1700000000000}}"#;
        let envelope: CombinedEnvelope = serde_json::from_str(raw).unwrap();
        let event = decode_frame(envelope).unwrap();
        assert!(matches!(event, UpstreamMarketEvent::Trade { .. }));
    }

    #[test]
    fn decodes_depth_update_envelope() {
        let raw = r#"{"stream":"btcusdt@depth@100ms","data":{"e":"depthUpdate","s":"BTCUSDT","U":1,"u":2,"b":[["100.0","1.0"]],"a":[]}}"#;
        let envelope: CombinedEnvelope = serde_json::from_str(raw).unwrap();
        let event = decode_frame(envelope).unwrap();
        match event {
            UpstreamMarketEvent::DepthUpdate { symbol, update } => {
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(update.final_update_id, 2);
            }
            _ => panic!("expected depth update event"),
        }
    }

    #[test]
    fn unrecognized_event_type_is_ignored() {
        let raw = r#"{"stream":"btcusdt@kline_1h","data":{"e":"somethingElse"}}"#;
        let envelope: CombinedEnvelope = serde_json::from_str(raw).unwrap();
        assert!(decode_frame(envelope).is_none());
    }

    #[test]
    fn stream_symbol_extracts_uppercase_prefix() {
        assert_eq!(stream_symbol("btcusdt@kline_1h"), "BTCUSDT");
        assert_eq!(stream_symbol("ethusdt@trade"), "ETHUSDT");
    }
}
