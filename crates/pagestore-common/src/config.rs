//! Configuration types for pagestore
//!
//! This module defines configuration structures used across components.
//! Every section deserializes with defaults so a partial TOML file is valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for pagestore
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Object defaults
    pub store: StoreConfig,
    /// Client read behaviour
    pub client: ClientConfig,
    /// Storage backend
    pub backend: BackendConfig,
    /// Logging
    pub logging: LoggingConfig,
}

impl Config {
    /// Check that the configuration describes a usable setup
    pub fn validate(&self) -> Result<()> {
        if self.store.page_size == 0 {
            return Err(Error::Configuration("store.page_size must be positive".into()));
        }
        if self.store.replication_count == 0 {
            return Err(Error::Configuration(
                "store.replication_count must be at least 1".into(),
            ));
        }
        if self.client.max_concurrent_fetches == 0 {
            return Err(Error::Configuration(
                "client.max_concurrent_fetches must be at least 1".into(),
            ));
        }
        if self.backend.providers.is_empty() {
            return Err(Error::Configuration("backend.providers is empty".into()));
        }
        if self.backend.providers.len() < self.store.replication_count as usize {
            return Err(Error::Configuration(format!(
                "replication count {} exceeds provider count {}",
                self.store.replication_count,
                self.backend.providers.len()
            )));
        }
        Ok(())
    }
}

/// Defaults applied to newly created objects
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Bytes per page (default: 64 KB)
    pub page_size: u64,
    /// Replicas per page
    pub replication_count: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: 64 * 1024, // 64 KB
            replication_count: 1,
        }
    }
}

/// Client-side read configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Extra passes over a page's replica set after a transient failure
    pub read_retries: u32,
    /// Pause between replica passes (milliseconds)
    pub retry_backoff_ms: u64,
    /// Page fetches in flight per read
    pub max_concurrent_fetches: usize,
}

impl ClientConfig {
    /// Retry backoff as a duration
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_retries: 3,
            retry_backoff_ms: 50,
            max_concurrent_fetches: 32,
        }
    }
}

/// Storage backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Page providers as `host:port`
    pub providers: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                "127.0.0.1:7001".to_string(),
                "127.0.0.1:7002".to_string(),
                "127.0.0.1:7003".to_string(),
            ],
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
