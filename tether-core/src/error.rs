//! Error types for Tether operations

use crate::Operation;
use std::time::Duration;
use thiserror::Error;

/// Error text fragments that mean the remote stream (session) has lapsed and
/// a fresh connection is needed before statements can succeed again.
pub const SESSION_EXPIRED_MARKERS: [&str; 2] = ["STREAM_EXPIRED", "Received an invalid baton"];

/// Configuration errors. Fatal to initialization, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Database endpoint URI is empty")]
    MissingEndpoint,

    #[error("Database auth token is empty")]
    MissingToken,

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors raised by a database backend while connecting or executing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Statement failed: {message}")]
    Statement {
        message: String,
        code: Option<String>,
    },

    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    #[error("Attempt timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("No live database connection")]
    NotConnected,
}

impl BackendError {
    /// Whether this failure means the remote session expired.
    ///
    /// Classification is textual: backends report expiry only through their
    /// error messages (and, for Hrana, an error code).
    pub fn is_session_expired(&self) -> bool {
        let text = self.to_string();
        if SESSION_EXPIRED_MARKERS
            .iter()
            .any(|marker| text.contains(marker))
        {
            return true;
        }
        matches!(
            self,
            BackendError::Statement { code: Some(code), .. }
                if SESSION_EXPIRED_MARKERS.iter().any(|marker| code.contains(marker))
        )
    }
}

/// Errors from the persisted configuration store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Failed to read config store {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse config store {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Failed to write config store {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Config store lock poisoned")]
    LockPoisoned,
}

/// Master error type for all Tether errors.
#[derive(Debug, Clone, Error)]
pub enum TetherError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{operation} gave up after {attempts} attempts: {source}")]
    BudgetExhausted {
        operation: Operation,
        attempts: u32,
        source: BackendError,
    },
}

/// Result type alias for Tether operations.
pub type TetherResult<T> = Result<T, TetherError>;

// =============================================================================
// TESTS
// =============================================================================
