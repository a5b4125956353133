//! Configuration Management
//!
//! Loads broker configuration from environment variables: downstream port,
//! log level, exchange credentials (mock mode when absent), and proxy
//! settings.

pub mod credentials;
pub mod proxy;

pub use credentials::Credentials;
pub use proxy::{ProxyConfig, ProxyScheme};

const DEFAULT_WS_PORT: u16 = 14477;

/// Top-level broker configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Downstream (renderer-facing) WebSocket port.
    pub ws_port: u16,
    /// `LOG_LEVEL` env var, defaults to `info`.
    pub log_level: String,
    /// Exchange credentials; `None` selects mock mode.
    pub credentials: Option<Credentials>,
    /// Outbound proxy, if configured.
    pub proxy: Option<ProxyConfig>,
}

impl BrokerConfig {
    /// Reads `WS_PORT`/`WEBSOCKET_PORT`/`VITE_WS_PORT` (first set wins,
    /// falling back to 14477), `LOG_LEVEL`, credentials and proxy settings.
    pub fn from_env() -> Self {
        let ws_port = ["WS_PORT", "WEBSOCKET_PORT", "VITE_WS_PORT"]
            .iter()
            .find_map(|var| std::env::var(var).ok())
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(DEFAULT_WS_PORT);

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let credentials = Credentials::from_env().ok();
        let proxy = ProxyConfig::from_env();

        Self {
            ws_port,
            log_level,
            credentials,
            proxy,
        }
    }

    pub fn is_mock_mode(&self) -> bool {
        self.credentials.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_to_14477_when_no_port_vars_set() {
        for var in ["WS_PORT", "WEBSOCKET_PORT", "VITE_WS_PORT"] {
            unsafe { std::env::remove_var(var) };
        }
        let config = BrokerConfig::from_env();
        assert_eq!(config.ws_port, DEFAULT_WS_PORT);
    }

    #[test]
    #[serial]
    fn ws_port_wins_over_fallbacks() {
        unsafe {
            std::env::set_var("WS_PORT", "9001");
            std::env::set_var("WEBSOCKET_PORT", "9002");
        }
        let config = BrokerConfig::from_env();
        assert_eq!(config.ws_port, 9001);
        unsafe {
            std::env::remove_var("WS_PORT");
            std::env::remove_var("WEBSOCKET_PORT");
        }
    }

    #[test]
    #[serial]
    fn mock_mode_when_credentials_absent() {
        unsafe {
            std::env::remove_var("BK");
            std::env::remove_var("BS");
        }
        let config = BrokerConfig::from_env();
        assert!(config.is_mock_mode());
    }
}
