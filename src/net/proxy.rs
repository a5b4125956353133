//! Upstream WebSocket connects tunneled through an HTTP(S) or SOCKS5 proxy.
//!
//! `tokio-tungstenite` has no native proxy support, unlike `reqwest`'s REST
//! path. A SOCKS5 proxy is handled by `tokio-socks`; an HTTP(S) proxy is
//! handled with a minimal hand-rolled `CONNECT` tunnel over a plain
//! `TcpStream`, after which the resulting stream is handed to
//! `tokio_tungstenite::client_async_tls`.

use crate::config::{ProxyConfig, ProxyScheme};
use crate::error::BrokerError;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::{client_async_tls, MaybeTlsStream, WebSocketStream};

/// Connects to `url` through `proxy`, performing the TLS/WebSocket handshake
/// over the tunneled stream.
pub async fn connect_via_proxy(
    url: &str,
    proxy: &ProxyConfig,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, BrokerError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| BrokerError::BadRequest(format!("invalid websocket url: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| BrokerError::BadRequest("websocket url missing host".into()))?
        .to_string();
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| BrokerError::BadRequest("websocket url missing port".into()))?;

    let tcp = match proxy.scheme {
        ProxyScheme::Socks5 => connect_socks5(proxy, &host, port).await?,
        ProxyScheme::Http => connect_http_tunnel(proxy, &host, port).await?,
    };

    let (ws_stream, _) = client_async_tls(url, tcp)
        .await
        .map_err(BrokerError::from)?;
    Ok(ws_stream)
}

async fn connect_socks5(
    proxy: &ProxyConfig,
    host: &str,
    port: u16,
) -> Result<TcpStream, BrokerError> {
    let target = format!("{host}:{port}");
    let socks_stream = Socks5Stream::connect(proxy.addr().as_str(), target)
        .await
        .map_err(|e| BrokerError::BadRequest(format!("SOCKS5 connect failed: {e}")))?;
    Ok(socks_stream.into_inner())
}

async fn connect_http_tunnel(
    proxy: &ProxyConfig,
    host: &str,
    port: u16,
) -> Result<TcpStream, BrokerError> {
    let mut stream = TcpStream::connect(proxy.addr()).await?;

    let request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Connection: Keep-Alive\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    // Read the proxy's response status line + headers, stopping at the blank line.
    let mut reader = BufReader::new(&mut stream);
    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).await?;
        response.push(byte[0]);
        if response.ends_with(b"\r\n\r\n") {
            break;
        }
        if response.len() > 8192 {
            return Err(BrokerError::BadRequest(
                "proxy CONNECT response too large".into(),
            ));
        }
    }
    drop(reader);

    let status_line = String::from_utf8_lossy(&response);
    let status_ok = status_line
        .lines()
        .next()
        .map(|line| line.contains(" 200 "))
        .unwrap_or(false);
    if !status_ok {
        return Err(BrokerError::ExchangeReject {
            status: 502,
            body: format!(
                "proxy CONNECT failed: {}",
                status_line.lines().next().unwrap_or("")
            ),
        });
    }

    Ok(stream)
}
