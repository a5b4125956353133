//! Common test utilities and fixtures for integration tests
//!
//! This module provides shared test infrastructure including:
//! - A mock-mode `BrokerConfig` builder
//! - A helper that spawns the downstream WebSocket server on an ephemeral
//!   port and returns a connected client
//! - Custom assertion helpers for JSON schema validation

use std::sync::Once;

pub mod assertions;
pub mod fixtures;

static INIT: Once = Once::new();

/// Initialize test environment once per test run
/// Loads .env.test file and sets up logging
pub fn init_test_env() {
    INIT.call_once(|| {
        dotenv::from_filename(".env.test").ok();

        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
            .try_init()
            .ok();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_env() {
        init_test_env();
        // Should not panic on multiple calls
        init_test_env();
    }
}
