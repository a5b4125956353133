//! Integration tests for the downstream renderer-facing WebSocket server.

mod error_handling;
