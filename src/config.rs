//! Substrate configuration
//!
//! Centralized configuration management with environment variable support
//! and sensible defaults.

use std::env;
use std::time::Duration;

/// Default polling interval between agent cycles (in seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Fixed backoff after a failed cycle (in seconds)
pub const DEFAULT_ERROR_BACKOFF_SECS: u64 = 60;

/// Default store pool size
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Substrate configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Store configuration
    pub store: StoreConfig,
    /// Polling loop configuration
    pub runtime: RuntimeConfig,
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite file path or `sqlite:` url
    pub database_url: String,
    /// Maximum pooled connections
    pub max_connections: u32,
}

/// Polling loop configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Sleep between successful cycles
    pub poll_interval: Duration,
    /// Sleep after a failed cycle
    pub error_backoff: Duration,
}

impl RuntimeConfig {
    /// Create a runtime configuration with explicit intervals
    pub fn new(poll_interval: Duration, error_backoff: Duration) -> Self {
        Self {
            poll_interval,
            error_backoff,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            error_backoff: Duration::from_secs(DEFAULT_ERROR_BACKOFF_SECS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            store: StoreConfig {
                database_url: env::var("AGENT_DATABASE_URL").unwrap_or_else(|_| {
                    // Default to ~/.agent-substrate or current directory
                    if let Some(home) = env::var_os("HOME") {
                        format!("{}/.agent-substrate/agents.db", home.to_string_lossy())
                    } else {
                        ".agent-substrate/agents.db".to_string()
                    }
                }),
                max_connections: env::var("AGENT_DB_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|n| n.parse().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            },
            runtime: RuntimeConfig {
                poll_interval: Duration::from_secs(
                    env::var("AGENT_POLL_INTERVAL_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
                ),
                error_backoff: Duration::from_secs(
                    env::var("AGENT_ERROR_BACKOFF_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(DEFAULT_ERROR_BACKOFF_SECS),
                ),
            },
        }
    }
}
