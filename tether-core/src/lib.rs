//! Tether Core - Shared Types
//!
//! Error taxonomy, user namespacing, SQL values and statements, and client
//! settings. Every other Tether crate depends on this one; it does no IO.

pub mod config;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod statement;
pub mod value;

pub use config::ClientSettings;
pub use credentials::AuthToken;
pub use error::{
    BackendError, ConfigError, StoreError, TetherError, TetherResult, SESSION_EXPIRED_MARKERS,
};
pub use identity::{hash64, new_user_id, NamespaceId, TableName, UserId, TABLE_PREFIX};
pub use statement::Statement;
pub use value::{RowSet, SqlValue};

use std::fmt;

// ============================================================================
// CALL POLICY
// ============================================================================

/// The two kinds of remote operation, which get different retry budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => f.write_str("read"),
            Operation::Write => f.write_str("write"),
        }
    }
}

/// What a call does with a failure after logging it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Report the absent / no-op outcome.
    #[default]
    Swallow,
    /// Return the error to the caller.
    Propagate,
}

impl ErrorPolicy {
    /// Map a "rethrow to caller" flag to a policy.
    pub fn from_rethrow(rethrow: bool) -> Self {
        if rethrow {
            ErrorPolicy::Propagate
        } else {
            ErrorPolicy::Swallow
        }
    }

    pub fn propagates(self) -> bool {
        self == ErrorPolicy::Propagate
    }
}
