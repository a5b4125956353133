//! Low-level networking helpers shared by the upstream connectors.

pub mod proxy;
