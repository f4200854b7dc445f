//! # Configuration Modules
//!
//! Settings of the binding client, loadable from a JSON file. Binaries layer
//! their own flags and environment variables on top.

/// Client settings, defaults and endpoint derivation.
pub mod client_config;

pub use client_config::{endpoint_for, ClientConfig, ConfigError, CONTROL_PATH};
