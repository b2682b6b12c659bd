//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables.

use serde::Deserialize;

/// Server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Periodic batch run configuration.
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Configuration for the in-process batch timer.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Whether the in-process timer runs batches at all.
    /// Disable when an external scheduler owns the cadence.
    #[serde(default = "default_batch_enabled")]
    pub enabled: bool,

    /// Interval between batch runs, in seconds.
    /// Every decision is idempotent against persisted state, so any
    /// cadence is safe; shorter intervals only tighten delivery latency.
    #[serde(default = "default_batch_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3400".to_string()
}

fn default_batch_enabled() -> bool {
    true
}

fn default_batch_interval_seconds() -> u64 {
    300
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: default_batch_enabled(),
            interval_seconds: default_batch_interval_seconds(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
