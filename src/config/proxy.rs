//! Outbound proxy configuration.
//!
//! REST calls use `reqwest`'s native proxy support; upstream WebSocket
//! connects (which `tokio-tungstenite` does not proxy) are tunneled manually,
//! see `net::proxy`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyScheme {
    Socks5,
    Http,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    /// Reads `https_proxy`/`HTTPS_PROXY`/`http_proxy`/`HTTP_PROXY` (first set
    /// wins), sniffing the scheme from the URL prefix.
    pub fn from_env() -> Option<Self> {
        let raw = ["https_proxy", "HTTPS_PROXY", "http_proxy", "HTTP_PROXY"]
            .iter()
            .find_map(|var| std::env::var(var).ok())?;
        Self::parse(&raw)
    }

    fn parse(raw: &str) -> Option<Self> {
        let (scheme, rest) = if let Some(rest) = raw.strip_prefix("socks5://") {
            (ProxyScheme::Socks5, rest)
        } else if let Some(rest) = raw.strip_prefix("https://") {
            (ProxyScheme::Http, rest)
        } else if let Some(rest) = raw.strip_prefix("http://") {
            (ProxyScheme::Http, rest)
        } else {
            (ProxyScheme::Http, raw)
        };

        let rest = rest.trim_end_matches('/');
        let (host, port) = rest.rsplit_once(':')?;
        let port = port.parse::<u16>().ok()?;
        Some(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds a `reqwest::Proxy` for the REST client.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy, reqwest::Error> {
        let url = match self.scheme {
            ProxyScheme::Socks5 => format!("socks5://{}", self.addr()),
            ProxyScheme::Http => format!("http://{}", self.addr()),
        };
        reqwest::Proxy::all(url)
    }
}
