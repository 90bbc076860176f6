//! Runtime configuration
//!
//! [`RuntimeConfig`] has workable defaults; `from_env` overrides them from
//! `PEERLOOM_*` variables and `validate` runs before a runtime starts.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("prefix must be a single non-empty segment, got {0:?}")]
    InvalidPrefix(String),

    #[error("worker_count must be at least 1")]
    NoWorkers,

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
}

/// Runtime settings for one address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// First address segment owned by this runtime's store
    pub prefix: String,

    /// Number of concurrent work loops
    pub worker_count: usize,

    /// How long `shutdown` waits for workers to finish their iteration
    pub shutdown_timeout: Duration,

    /// Pause after a failed iteration before taking again
    pub idle_backoff: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            prefix: "local".to_string(),
            worker_count: 4,
            shutdown_timeout: Duration::from_secs(10),
            idle_backoff: Duration::from_millis(100),
        }
    }
}

impl RuntimeConfig {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Defaults overridden by `PEERLOOM_PREFIX`, `PEERLOOM_WORKERS` and
    /// `PEERLOOM_SHUTDOWN_TIMEOUT_MS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("PEERLOOM_PREFIX") {
            config.prefix = prefix;
        }

        if let Ok(workers) = std::env::var("PEERLOOM_WORKERS") {
            match workers.parse::<usize>() {
                Ok(count) => config.worker_count = count,
                Err(e) => warn!(value = %workers, error = %e, "Ignoring invalid PEERLOOM_WORKERS"),
            }
        }

        if let Ok(timeout) = std::env::var("PEERLOOM_SHUTDOWN_TIMEOUT_MS") {
            match timeout.parse::<u64>() {
                Ok(ms) => config.shutdown_timeout = Duration::from_millis(ms),
                Err(e) => warn!(
                    value = %timeout,
                    error = %e,
                    "Ignoring invalid PEERLOOM_SHUTDOWN_TIMEOUT_MS"
                ),
            }
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() || self.prefix.contains(':') {
            return Err(ConfigError::InvalidPrefix(self.prefix.clone()));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "shutdown_timeout",
            });
        }
        Ok(())
    }
}
