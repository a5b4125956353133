//! Single consolidated upstream market socket; stream-set diffing; debounced
//! reconnect.
//!
//! One `MarketStreamManager` is owned per renderer's `ChannelManager`. It
//! tracks the union of kline streams plus the (at most one) active
//! trade+depth "detail view" symbol, and keeps exactly one live upstream
//! socket carrying that union.

use crate::binance::websocket::connect_market_stream;
use crate::config::ProxyConfig;
use crate::types::{Interval, Symbol};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

const DEBOUNCE: Duration = Duration::from_millis(2_000);
const ABNORMAL_CLOSE_RECONNECT: Duration = Duration::from_millis(3_000);
const CONNECT_RETRY_BACKOFFS_SECS: [u64; 3] = [2, 4, 6];

/// A decoded upstream market-socket frame, handed to the owning renderer's
/// dispatch loop (kept outside this module since routing needs access to
/// `ChannelManager`'s channel table).
#[derive(Debug, Clone)]
pub enum UpstreamMarketEvent {
    Kline {
        stream_name: String,
        symbol: Symbol,
        interval: Interval,
        candle: crate::types::Candle,
    },
    Trade {
        symbol: Symbol,
        price: String,
        quantity: String,
        trade_time: i64,
    },
    DepthUpdate {
        symbol: Symbol,
        update: crate::depth_cache::DepthUpdate,
    },
}

struct StreamState {
    kline_streams: HashMap<String, HashSet<String>>,
    detail_symbol: Option<Symbol>,
    depth_view_enabled: bool,
    depth_view_symbol: Option<Symbol>,
    connected_streams: Vec<String>,
    socket_live: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            kline_streams: HashMap::new(),
            detail_symbol: None,
            depth_view_enabled: false,
            depth_view_symbol: None,
            connected_streams: Vec::new(),
            socket_live: false,
        }
    }

    /// The union of kline streams plus trade/depth streams for the detail
    /// view symbol, sorted so set-equality can be checked element-wise.
    fn desired_streams(&self) -> Vec<String> {
        let mut streams: Vec<String> = self.kline_streams.keys().cloned().collect();
        if self.depth_view_enabled {
            if let Some(sym) = &self.depth_view_symbol {
                let lower = sym.to_lowercase();
                streams.push(format!("{lower}@trade"));
                streams.push(format!("{lower}@depth@100ms"));
            }
        }
        streams.sort();
        streams
    }
}

pub fn kline_stream_name(symbol: &str, interval: Interval) -> String {
    format!("{}@kline_{}", symbol.to_lowercase(), interval)
}

pub struct MarketStreamManager {
    state: Mutex<StreamState>,
    generation: AtomicU64,
    events: mpsc::UnboundedSender<UpstreamMarketEvent>,
    ws_base_url: String,
    proxy: Option<ProxyConfig>,
    connect_gate: Arc<crate::upstream::ConnectGate>,
    run_handle: Mutex<Option<tokio::task::AbortHandle>>,
}

impl MarketStreamManager {
    pub fn new(
        events: mpsc::UnboundedSender<UpstreamMarketEvent>,
        ws_base_url: String,
        proxy: Option<ProxyConfig>,
        connect_gate: Arc<crate::upstream::ConnectGate>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(StreamState::new()),
            generation: AtomicU64::new(0),
            events,
            ws_base_url,
            proxy,
            connect_gate,
            run_handle: Mutex::new(None),
        })
    }

    /// Tears down all bookkeeping and forcibly closes the live socket, if
    /// any. Called when the owning renderer disconnects (the renderer's
    /// `ChannelManager` has already dropped all channels, so there is
    /// nothing left to reconnect for).
    pub async fn shutdown(self: &Arc<Self>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state.lock().await;
            state.kline_streams.clear();
            state.detail_symbol = None;
            state.depth_view_enabled = false;
            state.depth_view_symbol = None;
            state.connected_streams.clear();
            state.socket_live = false;
        }
        self.abort_run_handle().await;
    }

    pub async fn add_kline_stream(self: &Arc<Self>, channel_id: &str, symbol: &str, interval: Interval) {
        let stream = kline_stream_name(symbol, interval);
        {
            let mut state = self.state.lock().await;
            state
                .kline_streams
                .entry(stream)
                .or_default()
                .insert(channel_id.to_string());
        }
        self.schedule_reconnect();
    }

    pub async fn remove_kline_stream(self: &Arc<Self>, channel_id: &str, symbol: &str, interval: Interval) {
        let stream = kline_stream_name(symbol, interval);
        let changed = {
            let mut state = self.state.lock().await;
            if let Some(set) = state.kline_streams.get_mut(&stream) {
                let removed = set.remove(channel_id);
                if set.is_empty() {
                    state.kline_streams.remove(&stream);
                }
                removed
            } else {
                false
            }
        };
        if changed {
            self.schedule_reconnect();
        }
    }

    /// Removes `channel_id` from every kline stream's subscriber set.
    pub async fn remove_channel_streams(self: &Arc<Self>, channel_id: &str) {
        let changed = {
            let mut state = self.state.lock().await;
            let mut changed = false;
            state.kline_streams.retain(|_, subscribers| {
                if subscribers.remove(channel_id) {
                    changed = true;
                }
                !subscribers.is_empty()
            });
            changed
        };
        if changed {
            self.schedule_reconnect();
        }
    }

    /// Bookkeeping only; does not itself change the stream set.
    pub async fn set_detail_symbol(&self, symbol: &str) {
        self.state.lock().await.detail_symbol = Some(symbol.to_string());
    }

    /// Also disables depth view, since it only ever applies to the detail symbol.
    pub async fn clear_detail_symbol(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            state.detail_symbol = None;
        }
        self.disable_depth_view().await;
    }

    pub async fn enable_depth_view(self: &Arc<Self>, symbol: &str) {
        let changed = {
            let mut state = self.state.lock().await;
            if state.depth_view_enabled && state.depth_view_symbol.as_deref() == Some(symbol) {
                false
            } else {
                state.depth_view_enabled = true;
                state.depth_view_symbol = Some(symbol.to_string());
                true
            }
        };
        if changed {
            self.schedule_reconnect();
        }
    }

    pub async fn disable_depth_view(self: &Arc<Self>) {
        let changed = {
            let mut state = self.state.lock().await;
            if !state.depth_view_enabled {
                false
            } else {
                state.depth_view_enabled = false;
                state.depth_view_symbol = None;
                true
            }
        };
        if changed {
            self.schedule_reconnect();
        }
    }

    pub async fn subscribers_for_stream(&self, stream_name: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .kline_streams
            .get(stream_name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn detail_symbol(&self) -> Option<String> {
        self.state.lock().await.detail_symbol.clone()
    }

    pub async fn depth_view_symbol(&self) -> Option<String> {
        self.state.lock().await.depth_view_symbol.clone()
    }

    pub async fn connected_streams(&self) -> Vec<String> {
        self.state.lock().await.connected_streams.clone()
    }

    /// Resets the 2000ms debounce timer. On fire, reconnects only if the
    /// desired stream set actually differs from what's connected.
    pub fn schedule_reconnect(self: &Arc<Self>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            if this.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            this.reconcile().await;
        });
    }

    async fn reconcile(self: &Arc<Self>) {
        let desired = {
            let state = self.state.lock().await;
            state.desired_streams()
        };

        let (unchanged, socket_live) = {
            let state = self.state.lock().await;
            (state.connected_streams == desired, state.socket_live)
        };

        if unchanged && socket_live {
            return;
        }

        {
            let mut state = self.state.lock().await;
            state.socket_live = false;
        }

        if desired.is_empty() {
            self.abort_run_handle().await;
            let mut state = self.state.lock().await;
            state.connected_streams.clear();
            return;
        }

        self.connect_and_run(desired).await;
    }

    /// Aborts and drops the previously live socket's background task, if
    /// any. Must be called before installing a new `run_handle` or clearing
    /// the desired set: an `AbortHandle` dropped without `.abort()` leaves
    /// its task running, which would otherwise leave a stale socket
    /// streaming alongside (or instead of) the new one.
    async fn abort_run_handle(self: &Arc<Self>) {
        if let Some(handle) = self.run_handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn connect_and_run(self: &Arc<Self>, desired: Vec<String>) {
        self.connect_gate.wait().await;

        let mut last_err = None;
        for (attempt, backoff_secs) in CONNECT_RETRY_BACKOFFS_SECS.iter().enumerate() {
            match connect_market_stream(&self.ws_base_url, &desired, self.proxy.as_ref()).await {
                Ok(mut handle) => {
                    self.abort_run_handle().await;
                    {
                        let mut state = self.state.lock().await;
                        state.connected_streams = desired.clone();
                        state.socket_live = true;
                    }
                    let this = self.clone();
                    let generation = self.generation.load(Ordering::SeqCst);
                    let join_handle = tokio::spawn(async move {
                        let abnormal_close = handle.run(this.events.clone()).await;
                        {
                            let mut state = this.state.lock().await;
                            state.socket_live = false;
                        }
                        let still_wanted = {
                            let state = this.state.lock().await;
                            !state.desired_streams().is_empty()
                        };
                        if abnormal_close && still_wanted && this.generation.load(Ordering::SeqCst) == generation {
                            tokio::time::sleep(ABNORMAL_CLOSE_RECONNECT).await;
                            this.schedule_reconnect();
                        }
                    });
                    *self.run_handle.lock().await = Some(join_handle.abort_handle());
                    return;
                }
                Err(err) => {
                    if !err.is_retryable() {
                        tracing::error!(%err, "market socket connect failed with non-transient error, stopping");
                        return;
                    }
                    tracing::warn!(attempt, %err, "market socket connect failed, retrying");
                    last_err = Some(err);
                    if attempt + 1 < CONNECT_RETRY_BACKOFFS_SECS.len() {
                        tokio::time::sleep(Duration::from_secs(*backoff_secs)).await;
                    }
                }
            }
        }
        tracing::error!(?last_err, "market socket connect exhausted retries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_manager() -> Arc<MarketStreamManager> {
        let (tx, _rx) = mpsc::unbounded_channel();
        MarketStreamManager::new(
            tx,
            "wss://stream.binance.com:9443".to_string(),
            None,
            Arc::new(crate::upstream::ConnectGate::new()),
        )
    }

    #[tokio::test]
    async fn dedup_same_stream_from_two_channels() {
        let mgr = new_manager();
        mgr.add_kline_stream("mini-1", "BTCUSDT", Interval::OneHour).await;
        mgr.add_kline_stream("mini-2", "BTCUSDT", Interval::OneHour).await;
        let subs = mgr.subscribers_for_stream("btcusdt@kline_1h").await;
        assert_eq!(subs.len(), 2);
        let desired = mgr.state.lock().await.desired_streams();
        assert_eq!(desired, vec!["btcusdt@kline_1h".to_string()]);
    }

    #[tokio::test]
    async fn removing_last_subscriber_drops_stream_entry() {
        let mgr = new_manager();
        mgr.add_kline_stream("mini-1", "BTCUSDT", Interval::OneHour).await;
        mgr.remove_kline_stream("mini-1", "BTCUSDT", Interval::OneHour).await;
        let desired = mgr.state.lock().await.desired_streams();
        assert!(desired.is_empty());
    }

    #[tokio::test]
    async fn depth_view_adds_trade_and_depth_streams() {
        let mgr = new_manager();
        mgr.set_detail_symbol("BTCUSDT").await;
        mgr.add_kline_stream("detail-BTCUSDT-1h", "BTCUSDT", Interval::OneHour).await;
        mgr.enable_depth_view("BTCUSDT").await;
        let desired = mgr.state.lock().await.desired_streams();
        assert!(desired.contains(&"btcusdt@trade".to_string()));
        assert!(desired.contains(&"btcusdt@depth@100ms".to_string()));

        mgr.disable_depth_view().await;
        let desired = mgr.state.lock().await.desired_streams();
        assert!(!desired.contains(&"btcusdt@trade".to_string()));
    }

    #[tokio::test]
    async fn clear_detail_symbol_also_disables_depth_view() {
        let mgr = new_manager();
        mgr.set_detail_symbol("BTCUSDT").await;
        mgr.enable_depth_view("BTCUSDT").await;
        mgr.clear_detail_symbol().await;
        assert!(mgr.detail_symbol().await.is_none());
        assert!(mgr.depth_view_symbol().await.is_none());
    }

    #[tokio::test]
    async fn enable_depth_view_noop_on_same_symbol() {
        let mgr = new_manager();
        mgr.enable_depth_view("BTCUSDT").await;
        let gen_before = mgr.generation.load(Ordering::SeqCst);
        mgr.enable_depth_view("BTCUSDT").await;
        let gen_after = mgr.generation.load(Ordering::SeqCst);
        assert_eq!(gen_before, gen_after);
    }
}
