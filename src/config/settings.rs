//! Checker settings.
//!
//! Every knob has a default matching the classic behaviour: ten workers,
//! a 10 s TCP budget, a 15 s key-exchange budget, a five-message flood guard
//! and a one-second progress tick.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of concurrent workers.
pub const DEFAULT_CONCURRENCY: usize = 10;
/// Default TCP connect budget in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Default key-exchange budget in milliseconds.
pub const DEFAULT_KEX_TIMEOUT_MS: u64 = 15_000;
/// Default number of undrained auth messages tolerated before the peer is
/// considered to be flooding.
pub const DEFAULT_FLOOD_THRESHOLD: usize = 5;
/// Default progress monitor interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Settings for a check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerSettings {
    /// Number of concurrent workers.
    pub concurrency: usize,
    /// TCP connect timeout in milliseconds (0 disables it).
    pub connect_timeout_ms: u64,
    /// Key-exchange timeout in milliseconds (0 disables it).
    pub kex_timeout_ms: u64,
    /// Undrained auth messages tolerated before the connection is dropped.
    pub flood_threshold: usize,
    /// Progress monitor interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum connection attempts per second across all workers, 0 for
    /// unlimited.
    pub rate_limit: u32,
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            kex_timeout_ms: DEFAULT_KEX_TIMEOUT_MS,
            flood_threshold: DEFAULT_FLOOD_THRESHOLD,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            rate_limit: 0,
        }
    }
}

impl CheckerSettings {
    /// Set the worker count.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the TCP and key-exchange timeouts.
    pub fn with_timeouts(mut self, connect_ms: u64, kex_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.kex_timeout_ms = kex_ms;
        self
    }

    /// Set the progress monitor interval.
    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    /// Set the flood guard threshold.
    pub fn with_flood_threshold(mut self, threshold: usize) -> Self {
        self.flood_threshold = threshold;
        self
    }

    /// Set the connection attempt rate limit.
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.rate_limit = per_second;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn kex_timeout(&self) -> Duration {
        Duration::from_millis(self.kex_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject settings the pool cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency",
                reason: "at least one worker is required".to_string(),
            });
        }
        if self.flood_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "flood_threshold",
                reason: "must allow at least one pending message".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
