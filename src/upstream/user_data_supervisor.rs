//! User-data supervisor: obtains a listen key, connects the private
//! user-data stream, keeps the key alive every 30 minutes, and classifies
//! `executionReport`/`outboundAccountPosition` frames for broadcast to every
//! renderer. One instance per process, spawned alongside the ticker
//! supervisor when the first renderer connects.

use crate::binance::client::RateLimitedClient;
use crate::binance::websocket::connect_user_data_stream;
use crate::config::ProxyConfig;
use crate::protocol::normalize_execution_report;
use crate::upstream::ConnectGate;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

const MAX_RETRIES: u32 = 5;
const ABNORMAL_CLOSE_RECONNECT: Duration = Duration::from_millis(5_000);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Classified user-data frame, ready to broadcast to every renderer.
#[derive(Debug, Clone)]
pub enum UserDataBroadcast {
    ExecutionUpdate(Value),
    BalanceUpdate(Value),
}

pub struct UserDataSupervisor {
    client: Arc<RateLimitedClient>,
    ws_base_url: String,
    proxy: Option<ProxyConfig>,
    connect_gate: Arc<ConnectGate>,
    renderer_count: Arc<AtomicUsize>,
    events: mpsc::UnboundedSender<UserDataBroadcast>,
}

impl UserDataSupervisor {
    pub fn new(
        client: Arc<RateLimitedClient>,
        ws_base_url: String,
        proxy: Option<ProxyConfig>,
        connect_gate: Arc<ConnectGate>,
        renderer_count: Arc<AtomicUsize>,
        events: mpsc::UnboundedSender<UserDataBroadcast>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
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

            let listen_key = match self.client.create_user_data_stream().await {
                Ok(key) => key,
                Err(err) => {
                    if !err.is_retryable() {
                        tracing::error!(%err, "user data supervisor: non-retryable listen key error, stopping");
                        return;
                    }
                    retries += 1;
                    if retries > MAX_RETRIES {
                        tracing::error!("user data supervisor exhausted retries obtaining listen key, stopping");
                        return;
                    }
                    let backoff = Duration::from_secs(3 * retries as u64);
                    tracing::warn!(retries, ?backoff, %err, "failed to obtain listen key, retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            self.connect_gate.wait().await;
            match connect_user_data_stream(&self.ws_base_url, &listen_key, self.proxy.as_ref()).await {
                Ok(handle) => {
                    retries = 0;
                    let (tx, mut rx) = mpsc::unbounded_channel();
                    let run_task = tokio::spawn(handle.run(tx));
                    let keepalive_task = self.clone().spawn_keepalive(listen_key.clone());

                    while let Some(raw) = rx.recv().await {
                        self.route_frame(raw);
                    }

                    keepalive_task.abort();
                    let abnormal_close = run_task.await.unwrap_or(true);
                    if self.renderer_count.load(Ordering::SeqCst) == 0 {
                        return;
                    }
                    if abnormal_close {
                        tracing::warn!("user data socket closed abnormally, reconnecting in 5s");
                        tokio::time::sleep(ABNORMAL_CLOSE_RECONNECT).await;
                    } else {
                        tracing::info!("user data socket closed normally, stopping supervisor");
                        return;
                    }
                }
                Err(err) => {
                    if !err.is_retryable() {
                        tracing::error!(%err, "user data supervisor: non-retryable connect error, stopping");
                        return;
                    }
                    retries += 1;
                    if retries > MAX_RETRIES {
                        tracing::error!("user data supervisor exhausted retries, stopping");
                        return;
                    }
                    let backoff = Duration::from_secs(3 * retries as u64);
                    tracing::warn!(retries, ?backoff, %err, "user data supervisor connect failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn spawn_keepalive(self: Arc<Self>, listen_key: String) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(KEEPALIVE_INTERVAL).await;
                if let Err(err) = self.client.keepalive_user_data_stream(&listen_key).await {
                    tracing::warn!(%err, "listen key keepalive failed");
                }
            }
        })
    }

    fn route_frame(&self, raw: Value) {
        let Some(event_type) = raw.get("e").and_then(|v| v.as_str()) else {
            return;
        };
        match event_type {
            "executionReport" => {
                let normalized = normalize_execution_report(&raw);
                let _ = self.events.send(UserDataBroadcast::ExecutionUpdate(normalized));
            }
            "outboundAccountPosition" => {
                let _ = self.events.send(UserDataBroadcast::BalanceUpdate(raw));
            }
            other => {
                tracing::debug!(event_type = other, "unrecognized user data event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_interval_is_thirty_minutes() {
        assert_eq!(KEEPALIVE_INTERVAL, Duration::from_secs(1800));
    }
}
