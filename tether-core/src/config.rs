//! Client tuning settings

use crate::{ConfigError, TetherResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry budgets and timeouts for remote operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSettings {
    /// Attempts per read before giving up.
    pub read_attempts: u32,
    /// Attempts per write before giving up. Writes are upserts, so retrying
    /// never duplicates rows.
    pub write_attempts: u32,
    /// Upper bound for a single attempt, in milliseconds.
    pub attempt_timeout_ms: u64,
    /// Upper bound for opening a connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Reads stop after the first non-expiry failure and report the key as
    /// absent instead of spending the rest of the budget.
    pub read_stops_on_transient: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            read_attempts: 3,
            write_attempts: 5,
            attempt_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            read_stops_on_transient: true,
        }
    }
}

impl ClientSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read attempt budget.
    pub fn with_read_attempts(mut self, attempts: u32) -> Self {
        self.read_attempts = attempts;
        self
    }

    /// Set the write attempt budget.
    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_read_stops_on_transient(mut self, stop: bool) -> Self {
        self.read_stops_on_transient = stop;
        self
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validate the settings.
    ///
    /// Validates:
    /// - both attempt budgets are at least 1
    /// - both timeouts are positive
    pub fn validate(&self) -> TetherResult<()> {
        if self.read_attempts == 0 {
            return Err(invalid("read_attempts", "must be >= 1"));
        }
        if self.write_attempts == 0 {
            return Err(invalid("write_attempts", "must be >= 1"));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(invalid("attempt_timeout_ms", "must be > 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("connect_timeout_ms", "must be > 0"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> crate::TetherError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
