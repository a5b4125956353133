//! Weight-windowed, spaced, retrying REST call wrapper.
//!
//! Hand-rolled admission/spacing/retry rather than a token-bucket crate,
//! because the window-eviction and spacing contract is a specific
//! algorithm the caller depends on bit for bit, not an off-the-shelf quota.

use crate::error::BrokerError;
use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub max_weight: u32,
    pub window: Duration,
    pub request_delay: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_weight: 800,
            window: Duration::from_millis(60_000),
            request_delay: Duration::from_millis(500),
        }
    }
}

struct State {
    records: VecDeque<(Instant, u32)>,
    last_request_time: Option<Instant>,
}

/// Process-wide REST admission gate. Cloning shares the same underlying
/// state (it wraps an `Arc`-free `Mutex` behind `&self`, so hold it behind
/// an `Arc` at the call site, see `BinanceClient`).
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                records: VecDeque::new(),
                last_request_time: None,
            }),
        }
    }

    /// Runs `make_call` under weight admission, inter-request spacing, and
    /// transient-failure retry with linear backoff (`1s, 2s, ...`).
    ///
    /// `make_call` is invoked fresh on every attempt since a `reqwest`
    /// request builder is not reusable after being sent.
    pub async fn execute<F, Fut, T>(
        &self,
        weight: u32,
        max_retries: u32,
        mut make_call: F,
    ) -> Result<T, BrokerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let mut attempt = 0;
        loop {
            self.admit(weight).await;
            self.space().await;

            match make_call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_secs(attempt as u64);
                    tracing::warn!(
                        attempt,
                        max_retries,
                        ?backoff,
                        "transient error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Blocks until admitting `weight` would not push the sliding window's
    /// total weight above `max_weight`, then records the admission.
    async fn admit(&self, weight: u32) {
        loop {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let window = self.config.window;

            while let Some(&(ts, _)) = state.records.front() {
                if now.duration_since(ts) > window {
                    state.records.pop_front();
                } else {
                    break;
                }
            }

            let current_weight: u32 = state.records.iter().map(|(_, w)| *w).sum();
            if current_weight + weight <= self.config.max_weight {
                state.records.push_back((now, weight));
                return;
            }

            let oldest = state.records.front().map(|(ts, _)| *ts).unwrap_or(now);
            let wait_until = oldest + window + Duration::from_millis(100);
            drop(state);

            let now = Instant::now();
            if wait_until > now {
                tokio::time::sleep(wait_until - now).await;
            }
        }
    }

    /// Blocks until at least `request_delay` has elapsed since the previous
    /// request, then updates `last_request_time`.
    async fn space(&self) {
        let wait = {
            let state = self.state.lock().await;
            state.last_request_time.map(|last| {
                let elapsed = Instant::now().duration_since(last);
                self.config.request_delay.saturating_sub(elapsed)
            })
        };

        if let Some(wait) = wait {
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        let mut state = self.state.lock().await;
        state.last_request_time = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn weight_cap_never_exceeded_in_window() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_weight: 100,
            window: Duration::from_millis(60_000),
            request_delay: Duration::from_millis(100),
        });

        for _ in 0..11 {
            limiter
                .execute(10, 0, || async { Ok::<_, BrokerError>(()) })
                .await
                .unwrap();
        }

        let state = limiter.state.lock().await;
        let total: u32 = state.records.iter().map(|(_, w)| *w).sum();
        assert!(total <= 100);
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_enforced_between_calls() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_weight: 1000,
            window: Duration::from_millis(60_000),
            request_delay: Duration::from_millis(100),
        });

        let start = Instant::now();
        limiter
            .execute(1, 0, || async { Ok::<_, BrokerError>(()) })
            .await
            .unwrap();
        limiter
            .execute(1, 0, || async { Ok::<_, BrokerError>(()) })
            .await
            .unwrap();
        assert!(Instant::now().duration_since(start) >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_up_to_bound_then_succeeds() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_weight: 1000,
            window: Duration::from_millis(60_000),
            request_delay: Duration::from_millis(0),
        });
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = limiter
            .execute(1, 2, move || {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(BrokerError::Transient(crate::error::TransientKind::ConnectionReset))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_propagates_immediately() {
        let limiter = RateLimiter::new(RateLimiterConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), BrokerError> = limiter
            .execute(1, 5, move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(BrokerError::bad_request("nope"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
