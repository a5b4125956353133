//! Ticker supervisor: the public `!ticker@arr` feed, filtered and fanned into
//! [`crate::ticker_cache::TickerCache`]. One instance per process, spawned
//! alongside the user-data supervisor when the first renderer connects.

use crate::binance::websocket::connect_ticker_stream;
use crate::config::ProxyConfig;
use crate::ticker_cache::{TickerCache, TickerEntry};
use crate::upstream::ConnectGate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

const MAX_RETRIES: u32 = 5;
const ABNORMAL_CLOSE_RECONNECT: Duration = Duration::from_millis(5_000);

/// Emitted for every ticker entry that survives the `BTC`/`USDT` filter.
#[derive(Debug, Clone)]
pub struct TickerBroadcast {
    pub index: usize,
    pub entry: TickerEntry,
}

pub struct TickerSupervisor {
    cache: Arc<TickerCache>,
    ws_base_url: String,
    proxy: Option<ProxyConfig>,
    connect_gate: Arc<ConnectGate>,
    renderer_count: Arc<AtomicUsize>,
    events: mpsc::UnboundedSender<TickerBroadcast>,
}

fn keep_symbol(symbol: &str) -> bool {
    symbol.contains("BTC") || symbol.contains("USDT")
}

impl TickerSupervisor {
    pub fn new(
        cache: Arc<TickerCache>,
        ws_base_url: String,
        proxy: Option<ProxyConfig>,
        connect_gate: Arc<ConnectGate>,
        renderer_count: Arc<AtomicUsize>,
        events: mpsc::UnboundedSender<TickerBroadcast>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            ws_base_url,
            proxy,
            connect_gate,
            renderer_count,
            events,
        })
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_forever().await;
        })
    }

    async fn run_forever(self: Arc<Self>) {
        let mut retries: u32 = 0;
        loop {
            if self.renderer_count.load(Ordering::SeqCst) == 0 {
                return;
            }

            self.connect_gate.wait().await;
            match connect_ticker_stream(&self.ws_base_url, self.proxy.as_ref()).await {
                Ok(handle) => {
                    retries = 0;
                    let (tx, mut rx) = mpsc::unbounded_channel();
                    let run_task = tokio::spawn(handle.run(tx));

                    while let Some(entries) = rx.recv().await {
                        for entry in entries {
                            if !keep_symbol(&entry.symbol) {
                                continue;
                            }
                            let ticker_entry = TickerEntry {
                                symbol: entry.symbol,
                                last_price: entry.last_price,
                                price_change_percent: entry.price_change_percent,
                            };
                            let index = self.cache.upsert(ticker_entry.clone()).await;
                            let _ = self.events.send(TickerBroadcast {
                                index,
                                entry: ticker_entry,
                            });
                        }
                    }

                    let abnormal_close = run_task.await.unwrap_or(true);
                    if self.renderer_count.load(Ordering::SeqCst) == 0 {
                        return;
                    }
                    if abnormal_close {
                        tracing::warn!("ticker socket closed abnormally, reconnecting in 5s");
                        tokio::time::sleep(ABNORMAL_CLOSE_RECONNECT).await;
                    } else {
                        tracing::info!("ticker socket closed normally, stopping supervisor");
                        return;
                    }
                }
                Err(err) => {
                    if !err.is_retryable() {
                        tracing::error!(%err, "ticker supervisor: non-retryable connect error, stopping");
                        return;
                    }
                    retries += 1;
                    if retries > MAX_RETRIES {
                        tracing::error!("ticker supervisor exhausted retries, stopping");
                        return;
                    }
                    let backoff = Duration::from_secs(3 * retries as u64);
                    tracing::warn!(retries, ?backoff, %err, "ticker supervisor connect failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
