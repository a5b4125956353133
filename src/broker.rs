//! Binds shared process-wide state across renderers and schedules its
//! teardown. Confinement by `Arc<Mutex<…>>` around the narrow slice of
//! state that actually needs it, rather than a full actor.

use crate::binance::client::{BinanceClient, RateLimitedClient};
use crate::config::{BrokerConfig, ProxyConfig};
use crate::rate_limiter::RateLimiterConfig;
use crate::ticker_cache::TickerCache;
use crate::types::Environment;
use crate::upstream::ticker_supervisor::TickerSupervisor;
use crate::upstream::user_data_supervisor::{UserDataBroadcast, UserDataSupervisor};
use crate::upstream::ConnectGate;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};

const GLOBAL_BROADCAST_CAPACITY: usize = 256;

struct SupervisorHandles {
    ticker: tokio::task::JoinHandle<()>,
    ticker_fan_in: tokio::task::JoinHandle<()>,
    user_data: Option<tokio::task::JoinHandle<()>>,
    user_data_fan_in: Option<tokio::task::JoinHandle<()>>,
}

/// Process-wide shared state: the REST/WS client, the upstream supervisors,
/// the ticker cache, and the renderer count that gates their lifecycle.
pub struct Broker {
    ws_base_url: String,
    proxy: Option<ProxyConfig>,
    connect_gate: Arc<ConnectGate>,
    client: Option<Arc<RateLimitedClient>>,
    ticker_cache: Arc<TickerCache>,
    renderer_count: Arc<AtomicUsize>,
    broadcast_tx: broadcast::Sender<Value>,
    supervisors: Mutex<Option<SupervisorHandles>>,
}

impl Broker {
    pub fn new(config: &BrokerConfig) -> Arc<Self> {
        let environment = Environment::Mainnet;
        let client = if config.is_mock_mode() {
            None
        } else {
            let binance_client = BinanceClient::new(environment.base_url(), config.credentials.clone(), config.proxy.as_ref());
            Some(Arc::new(RateLimitedClient::new(binance_client, RateLimiterConfig::default())))
        };

        let (broadcast_tx, _rx) = broadcast::channel(GLOBAL_BROADCAST_CAPACITY);

        Arc::new(Self {
            ws_base_url: environment.ws_base_url().to_string(),
            proxy: config.proxy.clone(),
            connect_gate: Arc::new(ConnectGate::new()),
            client,
            ticker_cache: Arc::new(TickerCache::new()),
            renderer_count: Arc::new(AtomicUsize::new(0)),
            broadcast_tx,
            supervisors: Mutex::new(None),
        })
    }

    pub fn client(&self) -> Option<Arc<RateLimitedClient>> {
        self.client.clone()
    }

    pub fn ws_base_url(&self) -> String {
        self.ws_base_url.clone()
    }

    pub fn proxy(&self) -> Option<ProxyConfig> {
        self.proxy.clone()
    }

    pub fn connect_gate(&self) -> Arc<ConnectGate> {
        self.connect_gate.clone()
    }

    pub fn ticker_cache(&self) -> Arc<TickerCache> {
        self.ticker_cache.clone()
    }

    pub fn subscribe_global(&self) -> broadcast::Receiver<Value> {
        self.broadcast_tx.subscribe()
    }

    /// Current renderer count, for tests and diagnostics. Not used for any
    /// routing decision, `register_renderer`/`unregister_renderer` own that.
    pub fn renderer_count(&self) -> usize {
        self.renderer_count.load(Ordering::SeqCst)
    }

    /// Bumps the renderer count; spawns the shared supervisors on the
    /// first-ever renderer.
    pub async fn register_renderer(self: &Arc<Self>) {
        if self.renderer_count.fetch_add(1, Ordering::SeqCst) == 0 {
            self.spawn_supervisors().await;
        }
    }

    /// Drops the renderer count; aborts the shared supervisors once the
    /// last renderer has disconnected, so no upstream socket outlives its
    /// last subscriber.
    pub async fn unregister_renderer(self: &Arc<Self>) {
        if self.renderer_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(handles) = self.supervisors.lock().await.take() {
                handles.ticker.abort();
                handles.ticker_fan_in.abort();
                if let Some(h) = handles.user_data {
                    h.abort();
                }
                if let Some(h) = handles.user_data_fan_in {
                    h.abort();
                }
            }
        }
    }

    async fn spawn_supervisors(self: &Arc<Self>) {
        let (ticker_tx, mut ticker_rx) = mpsc::unbounded_channel();
        let ticker_supervisor = TickerSupervisor::new(
            self.ticker_cache.clone(),
            self.ws_base_url.clone(),
            self.proxy.clone(),
            self.connect_gate.clone(),
            self.renderer_count.clone(),
            ticker_tx,
        );
        let ticker = ticker_supervisor.spawn();

        let broadcast_tx = self.broadcast_tx.clone();
        let ticker_fan_in = tokio::spawn(async move {
            while let Some(broadcast_entry) = ticker_rx.recv().await {
                let payload = json!({
                    "index": broadcast_entry.index,
                    "symbol": broadcast_entry.entry.symbol,
                    "lastPrice": broadcast_entry.entry.last_price,
                    "priceChangePercent": broadcast_entry.entry.price_change_percent,
                });
                let _ = broadcast_tx.send(crate::protocol::Outbound::global("ticker_update", payload).to_value());
            }
        });

        let (user_data, user_data_fan_in) = if let Some(client) = self.client.clone() {
            let (user_data_tx, mut user_data_rx) = mpsc::unbounded_channel();
            let supervisor = UserDataSupervisor::new(
                client,
                self.ws_base_url.clone(),
                self.proxy.clone(),
                self.connect_gate.clone(),
                self.renderer_count.clone(),
                user_data_tx,
            );
            let handle = supervisor.spawn();

            let broadcast_tx = self.broadcast_tx.clone();
            let fan_in = tokio::spawn(async move {
                while let Some(event) = user_data_rx.recv().await {
                    let frame = match event {
                        UserDataBroadcast::ExecutionUpdate(payload) => {
                            crate::protocol::Outbound::global("execution_update", payload).to_value()
                        }
                        UserDataBroadcast::BalanceUpdate(payload) => {
                            crate::protocol::Outbound::global("balance_update", payload).to_value()
                        }
                    };
                    let _ = broadcast_tx.send(frame);
                }
            });
            (Some(handle), Some(fan_in))
        } else {
            (None, None)
        };

        *self.supervisors.lock().await = Some(SupervisorHandles {
            ticker,
            ticker_fan_in,
            user_data,
            user_data_fan_in,
        });
    }
}
