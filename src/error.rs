//! Error Types and Handling
//!
//! Defines the error types used throughout the broker. Error messages never
//! expose API secrets; see `logging` for the redaction layer that guards
//! against secrets leaking through formatted error text as well.

use thiserror::Error;

/// Transient failure kinds that are safe to retry.
///
/// Connection reset, timeout, refused, unknown host, socket disconnected,
/// TLS handshake failures. These are the only kind `BrokerError::is_retryable`
/// inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    ConnectionReset,
    Timeout,
    Refused,
    UnknownHost,
    SocketDisconnected,
    Tls,
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConnectionReset => "connection reset",
            Self::Timeout => "timed out",
            Self::Refused => "connection refused",
            Self::UnknownHost => "unknown host",
            Self::SocketDisconnected => "socket disconnected",
            Self::Tls => "TLS error",
        };
        write!(f, "{s}")
    }
}

/// Error type for the broker's REST, WebSocket and protocol layers.
///
/// The retry classifier (`is_retryable`) only ever looks at `Transient`;
/// `ExchangeReject` and `BadRequest` are never retried.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Network-classified failure; safe to retry with bounded backoff.
    #[error("transient error: {0}")]
    Transient(TransientKind),

    /// Non-2xx response from the exchange, or an order rejection.
    #[error("exchange rejected request: HTTP {status}: {body}")]
    ExchangeReject { status: u16, body: String },

    /// Invalid input from a renderer or caller; never retried, logged at warn.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Operation was cancelled (e.g. renderer disconnected mid-flight).
    #[error("cancelled")]
    Cancelled,
}

impl BrokerError {
    /// True only for `Transient`, the sole retryable variant.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Transient(_))
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        BrokerError::BadRequest(msg.into())
    }
}

/// Classifies a lowercased error message by substring:
/// reset/timeout/refused/unknown-host/socket disconnected/network.
fn classify_message(msg: &str) -> Option<TransientKind> {
    let m = msg.to_lowercase();
    if m.contains("reset") {
        Some(TransientKind::ConnectionReset)
    } else if m.contains("timed out") || m.contains("timeout") {
        Some(TransientKind::Timeout)
    } else if m.contains("refused") {
        Some(TransientKind::Refused)
    } else if m.contains("unknown host") || m.contains("dns") || m.contains("lookup") {
        Some(TransientKind::UnknownHost)
    } else if m.contains("socket disconnected") || m.contains("disconnected") {
        Some(TransientKind::SocketDisconnected)
    } else if m.contains("tls") || m.contains("certificate") {
        Some(TransientKind::Tls)
    } else if m.contains("network") {
        Some(TransientKind::ConnectionReset)
    } else {
        None
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return BrokerError::Transient(TransientKind::Timeout);
        }
        if err.is_connect() {
            return BrokerError::Transient(TransientKind::Refused);
        }
        if let Some(status) = err.status() {
            return BrokerError::ExchangeReject {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }
        classify_message(&err.to_string())
            .map(BrokerError::Transient)
            .unwrap_or_else(|| BrokerError::BadRequest(err.to_string()))
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::BadRequest(format!("failed to parse JSON: {err}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BrokerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match &err {
            WsError::Io(io_err) => classify_message(&io_err.to_string())
                .map(BrokerError::Transient)
                .unwrap_or(BrokerError::Transient(TransientKind::ConnectionReset)),
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                BrokerError::Transient(TransientKind::SocketDisconnected)
            }
            WsError::Tls(_) => BrokerError::Transient(TransientKind::Tls),
            _ => classify_message(&err.to_string())
                .map(BrokerError::Transient)
                .unwrap_or_else(|| BrokerError::BadRequest(err.to_string())),
        }
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        classify_message(&err.to_string())
            .map(BrokerError::Transient)
            .unwrap_or_else(|| BrokerError::BadRequest(err.to_string()))
    }
}
