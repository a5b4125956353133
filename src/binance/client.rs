//! Exchange REST client.
//!
//! Wraps `reqwest::Client` with timeout, proxy and HMAC request signing.
//! Every call is routed through the shared `RateLimiter` at the documented
//! weight for that endpoint.

use crate::binance::types::{
    AccountResponse, DepthSnapshotResponse, ExchangeInfoResponse, KlineRow, ListenKeyResponse,
    OrderResponse, PublicTradeEntry, ServerTimeResponse, TradeEntry,
};
use crate::config::{Credentials, ProxyConfig};
use crate::error::BrokerError;
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::types::{Interval, Side};
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>, credentials: Option<Credentials>, proxy: Option<&ProxyConfig>) -> Self {
        Self::with_timeout(base_url, credentials, proxy, Duration::from_secs(10))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        credentials: Option<Credentials>,
        proxy: Option<&ProxyConfig>,
        timeout: Duration,
    ) -> Self {
        let mut builder = Client::builder()
            .timeout(timeout)
            .user_agent("market-broker/0.1.0");
        if let Some(proxy) = proxy {
            if let Ok(reqwest_proxy) = proxy.to_reqwest_proxy() {
                builder = builder.proxy(reqwest_proxy);
            }
        }
        let client = builder.build().expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            credentials,
        }
    }

    fn timestamp_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64
    }

    fn sign(&self, query: &str) -> Result<String, BrokerError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| BrokerError::bad_request("signed endpoint requires credentials"))?;
        let mut mac = HmacSha256::new_from_slice(creds.secret_key.expose_secret().as_bytes())
            .map_err(|e| BrokerError::bad_request(e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn api_key_header(&self) -> Result<&str, BrokerError> {
        self.credentials
            .as_ref()
            .map(|c| c.api_key.expose_secret())
            .ok_or_else(|| BrokerError::bad_request("signed endpoint requires credentials"))
    }

    async fn get_public<T: serde::de::DeserializeOwned>(&self, path: &str, query: &str) -> Result<T, BrokerError> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BrokerError::ExchangeReject { status, body });
        }
        Ok(resp.json().await?)
    }

    async fn get_signed<T: serde::de::DeserializeOwned>(&self, path: &str, params: &str) -> Result<T, BrokerError> {
        let query = format!("{params}&timestamp={}", Self::timestamp_ms());
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        let resp = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", self.api_key_header()?)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BrokerError::ExchangeReject { status, body });
        }
        Ok(resp.json().await?)
    }

    async fn post_signed<T: serde::de::DeserializeOwned>(&self, path: &str, params: &str) -> Result<T, BrokerError> {
        let query = format!("{params}&timestamp={}", Self::timestamp_ms());
        let signature = self.sign(&query)?;
        let url = format!("{}{}", self.base_url, path);
        let body = format!("{query}&signature={signature}");
        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", self.api_key_header()?)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BrokerError::ExchangeReject { status, body });
        }
        Ok(resp.json().await?)
    }

    async fn delete_signed<T: serde::de::DeserializeOwned>(&self, path: &str, params: &str) -> Result<T, BrokerError> {
        let query = format!("{params}&timestamp={}", Self::timestamp_ms());
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        let resp = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", self.api_key_header()?)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BrokerError::ExchangeReject { status, body });
        }
        Ok(resp.json().await?)
    }

    async fn put_signed(&self, path: &str, params: &str) -> Result<(), BrokerError> {
        let query = format!("{params}&timestamp={}", Self::timestamp_ms());
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        let resp = self
            .client
            .put(&url)
            .header("X-MBX-APIKEY", self.api_key_header()?)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BrokerError::ExchangeReject { status, body });
        }
        Ok(())
    }

    /// `GET /api/v3/time` (weight 1). Used once at startup to log clock skew.
    pub async fn get_server_time(&self) -> Result<i64, BrokerError> {
        let resp: ServerTimeResponse = self.get_public("/api/v3/time", "").await?;
        if !resp.is_valid() {
            return Err(BrokerError::bad_request("invalid server time received"));
        }
        Ok(resp.time_ms())
    }

    /// `GET /api/v3/exchangeInfo` (weight 10).
    pub async fn exchange_info(&self, symbol: &str) -> Result<ExchangeInfoResponse, BrokerError> {
        self.get_public("/api/v3/exchangeInfo", &format!("symbol={symbol}")).await
    }

    /// `GET /api/v3/ticker/24hr` (weight 40+). Kept for REST-surface
    /// completeness; the live ticker channel is fed by `!ticker@arr`.
    pub async fn ticker_24hr(&self, symbol: &str) -> Result<serde_json::Value, BrokerError> {
        self.get_public("/api/v3/ticker/24hr", &format!("symbol={symbol}")).await
    }

    /// `GET /api/v3/depth` (weight 5, `limit=100`).
    pub async fn depth(&self, symbol: &str, limit: u32) -> Result<DepthSnapshotResponse, BrokerError> {
        self.get_public("/api/v3/depth", &format!("symbol={symbol}&limit={limit}")).await
    }

    /// `GET /api/v3/klines` (weight 2, `limit=500`).
    pub async fn klines(&self, symbol: &str, interval: Interval, limit: u32) -> Result<Vec<KlineRow>, BrokerError> {
        self.get_public(
            "/api/v3/klines",
            &format!("symbol={symbol}&interval={}&limit={limit}", interval.as_str()),
        )
        .await
    }

    /// `GET /api/v3/trades` (weight 1, `limit=100`).
    pub async fn get_trades(&self, symbol: &str, limit: u32) -> Result<Vec<PublicTradeEntry>, BrokerError> {
        self.get_public("/api/v3/trades", &format!("symbol={symbol}&limit={limit}")).await
    }

    /// `GET /api/v3/account` (weight 10, signed).
    pub async fn get_account(&self) -> Result<AccountResponse, BrokerError> {
        self.get_signed("/api/v3/account", "").await
    }

    /// `GET /api/v3/openOrders` (weight 3, signed).
    pub async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderResponse>, BrokerError> {
        let params = symbol.map(|s| format!("symbol={s}")).unwrap_or_default();
        self.get_signed("/api/v3/openOrders", &params).await
    }

    /// `GET /api/v3/myTrades` (weight 10, signed, `limit=500`).
    pub async fn my_trades(&self, symbol: &str, limit: u32) -> Result<Vec<TradeEntry>, BrokerError> {
        self.get_signed("/api/v3/myTrades", &format!("symbol={symbol}&limit={limit}")).await
    }

    /// `POST /api/v3/order` (weight 1, signed). LIMIT/GTC with
    /// `newOrderRespType=FULL` so the caller gets the full fill fields back.
    pub async fn new_order(
        &self,
        symbol: &str,
        side: Side,
        price: &str,
        quantity: &str,
        client_order_id: Option<&str>,
    ) -> Result<OrderResponse, BrokerError> {
        let mut params = format!(
            "symbol={symbol}&side={side}&type=LIMIT&timeInForce=GTC&quantity={quantity}&price={price}&newOrderRespType=FULL"
        );
        if let Some(id) = client_order_id {
            params.push_str(&format!("&newClientOrderId={id}"));
        }
        self.post_signed("/api/v3/order", &params).await
    }

    /// `DELETE /api/v3/order` (weight 1, signed).
    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: Option<i64>,
        orig_client_order_id: Option<&str>,
    ) -> Result<OrderResponse, BrokerError> {
        let mut params = format!("symbol={symbol}");
        if let Some(id) = order_id {
            params.push_str(&format!("&orderId={id}"));
        }
        if let Some(id) = orig_client_order_id {
            params.push_str(&format!("&origClientOrderId={id}"));
        }
        self.delete_signed("/api/v3/order", &params).await
    }

    /// `POST /api/v3/userDataStream` (weight 1, signed key requirement but
    /// no signature, API key header only).
    pub async fn create_user_data_stream(&self) -> Result<String, BrokerError> {
        let url = format!("{}/api/v3/userDataStream", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", self.api_key_header()?)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BrokerError::ExchangeReject { status, body });
        }
        let parsed: ListenKeyResponse = resp.json().await?;
        Ok(parsed.listen_key)
    }

    /// `PUT /api/v3/userDataStream`, every 30 minutes.
    pub async fn keepalive_user_data_stream(&self, listen_key: &str) -> Result<(), BrokerError> {
        let url = format!("{}/api/v3/userDataStream?listenKey={}", self.base_url, listen_key);
        let resp = self
            .client
            .put(&url)
            .header("X-MBX-APIKEY", self.api_key_header()?)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BrokerError::ExchangeReject { status, body });
        }
        Ok(())
    }

    /// `DELETE /api/v3/userDataStream`.
    pub async fn close_user_data_stream(&self, listen_key: &str) -> Result<(), BrokerError> {
        let url = format!("{}/api/v3/userDataStream?listenKey={}", self.base_url, listen_key);
        let resp = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", self.api_key_header()?)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BrokerError::ExchangeReject { status, body });
        }
        Ok(())
    }
}

/// Wraps a `BinanceClient` with the shared `RateLimiter`, threading every
/// call through weight admission, spacing and retry.
#[derive(Clone)]
pub struct RateLimitedClient {
    pub client: BinanceClient,
    pub limiter: Arc<RateLimiter>,
}

impl RateLimitedClient {
    pub fn new(client: BinanceClient, config: RateLimiterConfig) -> Self {
        Self {
            client,
            limiter: Arc::new(RateLimiter::new(config)),
        }
    }

    pub async fn get_server_time(&self) -> Result<i64, BrokerError> {
        self.limiter.execute(1, 3, || self.client.get_server_time()).await
    }

    pub async fn exchange_info(&self, symbol: &str) -> Result<ExchangeInfoResponse, BrokerError> {
        self.limiter.execute(10, 3, || self.client.exchange_info(symbol)).await
    }

    pub async fn depth(&self, symbol: &str, limit: u32) -> Result<DepthSnapshotResponse, BrokerError> {
        self.limiter.execute(5, 3, || self.client.depth(symbol, limit)).await
    }

    pub async fn klines(&self, symbol: &str, interval: Interval, limit: u32) -> Result<Vec<KlineRow>, BrokerError> {
        self.limiter
            .execute(2, 3, || self.client.klines(symbol, interval, limit))
            .await
    }

    pub async fn get_trades(&self, symbol: &str, limit: u32) -> Result<Vec<PublicTradeEntry>, BrokerError> {
        self.limiter.execute(1, 3, || self.client.get_trades(symbol, limit)).await
    }

    pub async fn get_account(&self) -> Result<AccountResponse, BrokerError> {
        self.limiter.execute(10, 3, || self.client.get_account()).await
    }

    pub async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderResponse>, BrokerError> {
        self.limiter
            .execute(3, 3, || self.client.get_open_orders(symbol))
            .await
    }

    pub async fn my_trades(&self, symbol: &str, limit: u32) -> Result<Vec<TradeEntry>, BrokerError> {
        self.limiter.execute(10, 3, || self.client.my_trades(symbol, limit)).await
    }

    pub async fn new_order(
        &self,
        symbol: &str,
        side: Side,
        price: &str,
        quantity: &str,
        client_order_id: Option<&str>,
    ) -> Result<OrderResponse, BrokerError> {
        self.limiter
            .execute(1, 0, || self.client.new_order(symbol, side, price, quantity, client_order_id))
            .await
    }

    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: Option<i64>,
        orig_client_order_id: Option<&str>,
    ) -> Result<OrderResponse, BrokerError> {
        self.limiter
            .execute(1, 0, || self.client.cancel_order(symbol, order_id, orig_client_order_id))
            .await
    }

    pub async fn create_user_data_stream(&self) -> Result<String, BrokerError> {
        self.limiter.execute(1, 3, || self.client.create_user_data_stream()).await
    }

    pub async fn keepalive_user_data_stream(&self, listen_key: &str) -> Result<(), BrokerError> {
        self.limiter
            .execute(1, 0, || self.client.keepalive_user_data_stream(listen_key))
            .await
    }
}
