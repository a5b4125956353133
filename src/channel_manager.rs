//! Per-renderer channel registry: channel CRUD, the detail-channel
//! subscribe/unsubscribe protocol, depth-view passthroughs, and the
//! market-event routing table.

use crate::binance::client::RateLimitedClient;
use crate::channel::{channel_id, Channel, ChannelType};
use crate::depth_cache::{DepthSnapshot, DepthUpdate};
use crate::market_stream::{MarketStreamManager, UpstreamMarketEvent};
use crate::protocol::Outbound;
use crate::types::{Candle, Interval, Symbol};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

const KLINES_LIMIT: u32 = 500;
const TRADES_LIMIT: u32 = 100;
const MY_TRADES_LIMIT: u32 = 500;
const DEPTH_LIMIT: u32 = 100;

pub struct ChannelManager {
    channels: Mutex<HashMap<String, Channel>>,
    market_stream: Arc<MarketStreamManager>,
    client: Option<Arc<RateLimitedClient>>,
    outbound: mpsc::Sender<Value>,
    /// The symbol of the most recently subscribed channel, used as an order
    /// fallback when a renderer submits one without an explicit symbol.
    last_selected_symbol: Mutex<Option<Symbol>>,
}

fn send_outbound(outbound: &mpsc::Sender<Value>, frame: Value) {
    if outbound.try_send(frame).is_err() {
        tracing::warn!("renderer outbound buffer full, dropping frame");
    }
}

impl ChannelManager {
    pub fn new(
        market_stream: Arc<MarketStreamManager>,
        client: Option<Arc<RateLimitedClient>>,
        outbound: mpsc::Sender<Value>,
    ) -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
            market_stream,
            client,
            outbound,
            last_selected_symbol: Mutex::new(None),
        })
    }

    /// The renderer's last-subscribed symbol, used as an order fallback
    /// when a payload omits `symbol`.
    pub async fn last_selected_symbol(&self) -> Option<Symbol> {
        self.last_selected_symbol.lock().await.clone()
    }

    pub async fn has_channel(&self, id: &str) -> bool {
        self.channels.lock().await.contains_key(id)
    }

    pub async fn channel_ids(&self) -> Vec<String> {
        self.channels.lock().await.keys().cloned().collect()
    }

    async fn detail_channel_entry(&self) -> Option<(String, Symbol, Interval)> {
        self.channels
            .lock()
            .await
            .values()
            .find(|c| matches!(c.channel_type, ChannelType::Detail))
            .map(|c| (c.id.clone(), c.symbol.clone(), c.interval))
    }

    /// The full subscribe protocol: detail-channel teardown/replacement,
    /// initial REST fetches, and kline stream registration.
    pub async fn subscribe(
        self: &Arc<Self>,
        requested_id: String,
        channel_type: ChannelType,
        symbol: Symbol,
        interval: Interval,
        request_id: Option<String>,
    ) {
        if matches!(channel_type, ChannelType::Detail) {
            if let Some((old_id, old_symbol, old_interval)) = self.detail_channel_entry().await {
                if old_id != requested_id {
                    self.market_stream.remove_kline_stream(&old_id, &old_symbol, old_interval).await;
                    self.channels.lock().await.remove(&old_id);
                }
            }
        }

        let computed_id = channel_id(channel_type, &symbol, interval);
        let id = if requested_id.is_empty() { computed_id } else { requested_id };

        *self.last_selected_symbol.lock().await = Some(symbol.clone());

        {
            let mut channels = self.channels.lock().await;
            channels.remove(&id);
            channels.insert(
                id.clone(),
                Channel::new(id.clone(), channel_type, symbol.clone(), interval, now_secs()),
            );
        }

        if matches!(channel_type, ChannelType::Detail) {
            self.fetch_detail_bundle(&id, &symbol, &interval).await;
        }

        self.fetch_klines(&id, &symbol, interval, request_id).await;

        self.market_stream.add_kline_stream(&id, &symbol, interval).await;
        if matches!(channel_type, ChannelType::Detail) {
            self.market_stream.set_detail_symbol(&symbol).await;
        }
    }

    pub async fn unsubscribe(self: &Arc<Self>, id: &str) {
        let entry = self.channels.lock().await.get(id).map(|c| (c.channel_type, c.symbol.clone(), c.interval));
        let Some((channel_type, symbol, interval)) = entry else {
            return;
        };
        self.market_stream.remove_kline_stream(id, &symbol, interval).await;
        if matches!(channel_type, ChannelType::Detail) {
            self.market_stream.clear_detail_symbol().await;
        }
        self.channels.lock().await.remove(id);
    }

    pub async fn enable_depth_view(self: &Arc<Self>, symbol: &str) {
        self.market_stream.enable_depth_view(symbol).await;
    }

    pub async fn disable_depth_view(self: &Arc<Self>) {
        self.market_stream.disable_depth_view().await;
    }

    /// Removes every channel, then tears down the owned `MarketStreamManager`.
    pub async fn cleanup(self: &Arc<Self>) {
        self.channels.lock().await.clear();
        self.market_stream.shutdown().await;
    }

    async fn fetch_detail_bundle(&self, channel_id: &str, symbol: &str, interval: &Interval) {
        let Some(client) = self.client.clone() else {
            self.emit_mock_detail_bundle(channel_id, symbol, *interval);
            return;
        };

        let symbol = symbol.to_string();
        let (exchange_info, account, open_orders, my_trades, trades, depth) = tokio::join!(
            client.exchange_info(&symbol),
            client.get_account(),
            client.get_open_orders(Some(&symbol)),
            client.my_trades(&symbol, MY_TRADES_LIMIT),
            client.get_trades(&symbol, TRADES_LIMIT),
            client.depth(&symbol, DEPTH_LIMIT),
        );

        match exchange_info {
            Ok(info) => {
                if let Some(filters) = info.symbols.into_iter().next() {
                    send_outbound(&self.outbound, Outbound::global("filters", filters_payload(&filters)).to_value());
                }
            }
            Err(err) => tracing::error!(%err, symbol, "exchangeInfo fetch failed"),
        }

        match account {
            Ok(account) => {
                let balances: Vec<_> = account
                    .balances
                    .into_iter()
                    .filter(|b| b.free != "0" && b.free != "0.00000000" || b.locked != "0" && b.locked != "0.00000000")
                    .collect();
                send_outbound(&self.outbound, Outbound::global("balances", json!(balances)).to_value());
            }
            Err(err) => tracing::error!(%err, symbol, "getAccount fetch failed"),
        }

        match open_orders {
            Ok(orders) => {
                send_outbound(
                    &self.outbound,
                    Outbound::channel(channel_id, "orders", symbol.clone(), *interval, json!(orders)).to_value(),
                );
            }
            Err(err) => tracing::error!(%err, symbol, "getOpenOrders fetch failed"),
        }

        match my_trades {
            Ok(history) => {
                send_outbound(
                    &self.outbound,
                    Outbound::channel(channel_id, "history", symbol.clone(), *interval, json!(history)).to_value(),
                );
            }
            Err(err) => tracing::error!(%err, symbol, "myTrades fetch failed"),
        }

        match trades {
            Ok(trades) => {
                send_outbound(
                    &self.outbound,
                    Outbound::channel(channel_id, "trades", symbol.clone(), *interval, json!(trades)).to_value(),
                );
            }
            Err(err) => tracing::error!(%err, symbol, "getTrades fetch failed"),
        }

        match depth {
            Ok(snapshot) => {
                let last_update_id = snapshot.last_update_id;
                let mut channels = self.channels.lock().await;
                if let Some(channel) = channels.get_mut(channel_id) {
                    if let Some(cache) = channel.depth_cache.as_mut() {
                        cache.snapshot(DepthSnapshot {
                            last_update_id,
                            bids: snapshot.bids,
                            asks: snapshot.asks,
                        });
                        let (bids, asks) = cache.formatted();
                        drop(channels);
                        send_outbound(
                            &self.outbound,
                            Outbound::channel(channel_id, "depth", symbol.clone(), *interval, json!({"bids": bids, "asks": asks})).to_value(),
                        );
                    }
                }
            }
            Err(err) => tracing::error!(%err, symbol, "depth fetch failed"),
        }
    }

    fn emit_mock_detail_bundle(&self, channel_id: &str, symbol: &str, interval: Interval) {
        send_outbound(
            &self.outbound,
            Outbound::global(
                "filters",
                json!({"status": "TRADING", "baseAsset": "", "quoteAsset": "", "basePrecision": 8, "quotePrecision": 8}),
            )
            .to_value(),
        );
        send_outbound(&self.outbound, Outbound::global("balances", json!([])).to_value());
        send_outbound(
            &self.outbound,
            Outbound::channel(channel_id, "orders", symbol.to_string(), interval, json!([])).to_value(),
        );
        send_outbound(
            &self.outbound,
            Outbound::channel(channel_id, "history", symbol.to_string(), interval, json!([])).to_value(),
        );
        send_outbound(
            &self.outbound,
            Outbound::channel(channel_id, "trades", symbol.to_string(), interval, json!([])).to_value(),
        );
        send_outbound(
            &self.outbound,
            Outbound::channel(channel_id, "depth", symbol.to_string(), interval, json!({"bids": [], "asks": []})).to_value(),
        );
    }

    async fn fetch_klines(&self, channel_id: &str, symbol: &str, interval: Interval, request_id: Option<String>) {
        let rows = match &self.client {
            Some(client) => match client.klines(symbol, interval, KLINES_LIMIT).await {
                Ok(rows) => rows,
                Err(err) => {
                    tracing::error!(%err, symbol, "klines fetch failed");
                    return;
                }
            },
            None => Vec::new(),
        };

        let mut candles: Vec<Candle> = Vec::with_capacity(rows.len());
        let last_index = rows.len().saturating_sub(1);
        for (i, row) in rows.iter().enumerate() {
            Candle::merge(&mut candles, row.to_candle(i != last_index));
        }

        let extra = candles.last().copied().map(|c| json!(c));
        let mut outbound_frame = Outbound::channel(channel_id, "chart", symbol.to_string(), interval, json!(candles));
        if let Some(extra) = extra {
            outbound_frame = outbound_frame.with_extra(extra);
        }
        send_outbound(&self.outbound, outbound_frame.with_request_id(request_id).to_value());
    }

    /// Routes one decoded upstream market-socket frame to whichever of this
    /// renderer's channels still wants it. Run as a long-lived task owned by
    /// the renderer's dispatch loop.
    pub async fn route_market_event(self: &Arc<Self>, event: UpstreamMarketEvent) {
        match event {
            UpstreamMarketEvent::Kline { stream_name, symbol, interval, candle } => {
                let subscribers = self.market_stream.subscribers_for_stream(&stream_name).await;
                let channels = self.channels.lock().await;
                for cid in subscribers {
                    let Some(channel) = channels.get(&cid) else { continue };
                    if channel.symbol != symbol || channel.interval != interval {
                        continue;
                    }
                    send_outbound(
                        &self.outbound,
                        Outbound::channel(cid.clone(), "chart", symbol.clone(), interval, json!(candle)).to_value(),
                    );
                }
            }
            UpstreamMarketEvent::Trade { symbol, price, quantity, trade_time } => {
                let Some(detail_symbol) = self.market_stream.detail_symbol().await else { return };
                if detail_symbol != symbol {
                    return;
                }
                let Some((id, _, interval)) = self.detail_channel_entry().await else { return };
                send_outbound(
                    &self.outbound,
                    Outbound::channel(id, "trades", symbol, interval, json!({"price": price, "qty": quantity, "time": trade_time}))
                        .to_value(),
                );
            }
            UpstreamMarketEvent::DepthUpdate { symbol, update } => {
                let Some(detail_symbol) = self.market_stream.detail_symbol().await else { return };
                if detail_symbol != symbol {
                    return;
                }
                let Some((id, _, interval)) = self.detail_channel_entry().await else { return };
                let mut channels = self.channels.lock().await;
                let Some(channel) = channels.get_mut(&id) else { return };
                let Some(cache) = channel.depth_cache.as_mut() else { return };
                cache.update(DepthUpdate {
                    final_update_id: update.final_update_id,
                    bids: update.bids,
                    asks: update.asks,
                });
                let (bids, asks) = cache.formatted();
                drop(channels);
                send_outbound(
                    &self.outbound,
                    Outbound::channel(id, "depth", symbol, interval, json!({"bids": bids, "asks": asks})).to_value(),
                );
            }
        }
    }

    /// Spawns the long-lived task draining `rx` and dispatching each frame
    /// via `route_market_event`. Aborted by the owning renderer's teardown.
    pub fn spawn_market_event_router(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<UpstreamMarketEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.route_market_event(event).await;
            }
        })
    }
}

fn filters_payload(info: &crate::binance::types::SymbolInfo) -> Value {
    let find_filter = |filter_type: &str| -> Value {
        info.filters
            .iter()
            .find(|f| f.get("filterType").and_then(|v| v.as_str()) == Some(filter_type))
            .cloned()
            .unwrap_or(Value::Null)
    };
    json!({
        "status": info.status,
        "baseAsset": info.base_asset,
        "quoteAsset": info.quote_asset,
        "basePrecision": info.base_asset_precision,
        "quotePrecision": info.quote_asset_precision,
        "PRICE_FILTER": find_filter("PRICE_FILTER"),
        "LOT_SIZE": find_filter("LOT_SIZE"),
        "MIN_NOTIONAL": find_filter("MIN_NOTIONAL"),
    })
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
