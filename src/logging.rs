//! Structured logging setup and secret redaction.
//!
//! Initializes `tracing-subscriber` with an `EnvFilter` seeded from
//! `LOG_LEVEL` (not `RUST_LOG`), writing to stderr through a redacting
//! writer that substitutes any configured secret substring with the
//! literal `SECURED` before the bytes reach the terminal, turning "never
//! log the secret key" from a discipline into a guarantee.

use std::io::{self, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `secrets` are substrings (API secret,
/// listen key, ...) masked out of every line written to stderr.
pub fn init(log_level: &str, secrets: Vec<String>) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let make_writer = RedactingMakeWriter::new(secrets);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .init();
}

#[derive(Clone)]
struct RedactingMakeWriter {
    secrets: Arc<Vec<String>>,
}

impl RedactingMakeWriter {
    fn new(secrets: Vec<String>) -> Self {
        Self {
            secrets: Arc::new(secrets.into_iter().filter(|s| !s.is_empty()).collect()),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter {
    type Writer = RedactingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            secrets: self.secrets.clone(),
        }
    }
}

struct RedactingWriter {
    secrets: Arc<Vec<String>>,
}

impl Write for RedactingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len();
        if self.secrets.is_empty() {
            return io::stderr().write_all(buf).map(|_| len);
        }
        let mut text = String::from_utf8_lossy(buf).into_owned();
        for secret in self.secrets.iter() {
            if text.contains(secret.as_str()) {
                text = text.replace(secret.as_str(), "SECURED");
            }
        }
        io::stderr().write_all(text.as_bytes())?;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Substitutes every occurrence of `secret` in `text` with `SECURED`, for
/// masking values formatted into error messages before they are logged.
pub fn redact(text: &str, secrets: &[String]) -> String {
    let mut out = text.to_string();
    for secret in secrets {
        if !secret.is_empty() && out.contains(secret.as_str()) {
            out = out.replace(secret.as_str(), "SECURED");
        }
    }
    out
}
