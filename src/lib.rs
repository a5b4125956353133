//! Market data broker library.
//!
//! A local WebSocket server that multiplexes one consolidated upstream
//! connection to a Binance-compatible exchange across any number of UI
//! renderers, each declaring interest in named channels.

pub mod binance;
pub mod broker;
pub mod channel;
pub mod channel_manager;
pub mod config;
pub mod depth_cache;
pub mod downstream;
pub mod error;
pub mod logging;
pub mod market_stream;
pub mod net;
pub mod order_dispatcher;
pub mod protocol;
pub mod rate_limiter;
pub mod ticker_cache;
pub mod types;
pub mod upstream;

pub use broker::Broker;
pub use error::BrokerError;
