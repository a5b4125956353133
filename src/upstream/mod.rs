//! Upstream supervisors: one per always-on global socket (ticker, user data)
//! plus the process-wide connect throttle they share with
//! [`crate::market_stream::MarketStreamManager`].

pub mod ticker_supervisor;
pub mod user_data_supervisor;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use std::time::Duration;

/// Enforces at least 500ms between any two upstream WebSocket connect
/// attempts (market, ticker, user-data sockets alike). Binance's
/// connection-rate limit is shared across all sockets from one IP, so this
/// gate is process-wide rather than per-socket.
pub struct ConnectGate {
    limiter: GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ConnectGate {
    pub fn new() -> Self {
        let quota = Quota::with_period(Duration::from_millis(500)).expect("500ms is nonzero");
        Self {
            limiter: GovernorRateLimiter::direct(quota),
        }
    }

    /// Blocks until a connect slot is available.
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}

impl Default for ConnectGate {
    fn default() -> Self {
        Self::new()
    }
}
