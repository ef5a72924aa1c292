//! Tether Test Utilities
//!
//! Shared test infrastructure for the Tether workspace:
//! - A fault-injecting backend over an in-memory SQLite database
//! - Proptest generators for keys, values and user ids
//! - Fixtures for config stores and client settings
//! - Assertions for Tether-specific error shapes

pub use tether_core::{
    AuthToken, BackendError, ClientSettings, ConfigError, Operation, RowSet, Statement,
    TetherError, TetherResult, UserId,
};
pub use tether_storage::{MemoryConfigStore, PersistedConfig, SqliteBackend};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tether_storage::{Backend, BackendResult, Connection};

// ============================================================================
// FAULT-INJECTING BACKEND
// ============================================================================

/// A failure [`ScriptedBackend`] injects into a data statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Server reports the stream expired (`STREAM_EXPIRED`).
    SessionExpired,
    /// Server rejects the baton (`Received an invalid baton`).
    InvalidBaton,
    /// Any other backend failure.
    Transient(String),
    /// Statement stalls this long, then runs normally.
    Hang(Duration),
}

impl Fault {
    pub fn transient() -> Self {
        Fault::Transient("connection reset by peer".to_string())
    }

    fn error(&self) -> Option<BackendError> {
        match self {
            Fault::SessionExpired => Some(BackendError::Statement {
                message: "stream error: STREAM_EXPIRED".to_string(),
                code: Some("STREAM_EXPIRED".to_string()),
            }),
            Fault::InvalidBaton => Some(BackendError::Protocol {
                reason: "Received an invalid baton".to_string(),
            }),
            Fault::Transient(reason) => Some(BackendError::Transport {
                reason: reason.clone(),
            }),
            Fault::Hang(_) => None,
        }
    }
}

#[derive(Default)]
struct Script {
    queued: Mutex<VecDeque<Fault>>,
    sticky: Mutex<Option<Fault>>,
    connect_failures: AtomicU32,
    connect_stall: Mutex<Option<Duration>>,
    connects: AtomicU32,
    data_executes: AtomicU32,
    provision_executes: AtomicU32,
    statements: Mutex<Vec<String>>,
}

impl Script {
    fn next_fault(&self) -> Option<Fault> {
        let queued = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        queued.or_else(|| {
            self.sticky
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }
}

/// Backend over one shared in-memory SQLite database that fails on cue.
///
/// Faults apply to data statements only; table provisioning always runs.
/// Queued faults (`fail_next`) are consumed first, then the sticky fault
/// (`always_fail`), if any.
#[derive(Clone)]
pub struct ScriptedBackend {
    inner: Arc<SqliteBackend>,
    script: Arc<Script>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        let inner = match SqliteBackend::in_memory() {
            Ok(backend) => backend,
            Err(e) => panic!("in-memory sqlite unavailable: {e}"),
        };
        Self {
            inner: Arc::new(inner),
            script: Arc::new(Script::default()),
        }
    }

    /// Fail the next `count` data statements with `fault`.
    pub fn fail_next(&self, count: u32, fault: Fault) -> &Self {
        let mut queued = self
            .script
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        queued.extend((0..count).map(|_| fault.clone()));
        self
    }

    /// Fail every data statement with `fault` until [`Self::clear_faults`].
    pub fn always_fail(&self, fault: Fault) -> &Self {
        *self
            .script
            .sticky
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(fault);
        self
    }

    pub fn clear_faults(&self) -> &Self {
        self.script
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self
            .script
            .sticky
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_connects(&self, count: u32) -> &Self {
        self.script.connect_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Stall the next connection attempt for `duration` before it proceeds.
    pub fn stall_next_connect(&self, duration: Duration) -> &Self {
        *self
            .script
            .connect_stall
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(duration);
        self
    }

    /// Successful connects so far.
    pub fn connects(&self) -> u32 {
        self.script.connects.load(Ordering::SeqCst)
    }

    /// Data statements attempted so far, failed ones included.
    pub fn data_executes(&self) -> u32 {
        self.script.data_executes.load(Ordering::SeqCst)
    }

    /// Table provisioning statements run so far.
    pub fn provision_executes(&self) -> u32 {
        self.script.provision_executes.load(Ordering::SeqCst)
    }

    /// SQL text of every statement seen, in order.
    pub fn statements(&self) -> Vec<String> {
        self.script
            .statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Total backend calls (connects and statements).
    pub fn total_calls(&self) -> u32 {
        self.connects() + self.data_executes() + self.provision_executes()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn connect(
        &self,
        endpoint: &str,
        token: &AuthToken,
    ) -> BackendResult<Arc<dyn Connection>> {
        let refused = self
            .script
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(BackendError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let stall = self
            .script
            .connect_stall
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(duration) = stall {
            tokio::time::sleep(duration).await;
        }
        let inner = self.inner.connect(endpoint, token).await?;
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedConnection {
            inner,
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedConnection {
    inner: Arc<dyn Connection>,
    script: Arc<Script>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn execute(&self, statement: &Statement) -> BackendResult<RowSet> {
        self.script
            .statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(statement.sql.clone());

        if statement.sql.starts_with("CREATE TABLE") {
            self.script.provision_executes.fetch_add(1, Ordering::SeqCst);
            return self.inner.execute(statement).await;
        }

        self.script.data_executes.fetch_add(1, Ordering::SeqCst);
        match self.script.next_fault() {
            Some(Fault::Hang(duration)) => tokio::time::sleep(duration).await,
            Some(fault) => {
                if let Some(err) = fault.error() {
                    return Err(err);
                }
            }
            None => {}
        }
        self.inner.execute(statement).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Tether inputs.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// A settings-style key.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9_.-]{0,31}"
    }

    /// A printable value, possibly empty, possibly with quotes.
    pub fn arb_value() -> impl Strategy<Value = String> {
        "\\PC{0,64}"
    }

    /// Any 128-bit user id.
    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built stores and settings.

    use super::*;

    pub const TEST_ENDPOINT: &str = "file:tether-test";
    pub const TEST_TOKEN: &str = "test-token";

    /// Enabled, with endpoint and token set and no user id yet.
    pub fn enabled_config() -> PersistedConfig {
        PersistedConfig {
            enabled: true,
            endpoint: TEST_ENDPOINT.to_string(),
            token: TEST_TOKEN.to_string(),
            ..Default::default()
        }
    }

    pub fn enabled_store() -> Arc<MemoryConfigStore> {
        Arc::new(MemoryConfigStore::with_config(enabled_config()))
    }

    pub fn disabled_store() -> Arc<MemoryConfigStore> {
        Arc::new(MemoryConfigStore::with_config(PersistedConfig {
            enabled: false,
            ..enabled_config()
        }))
    }

    /// Default budgets with short timeouts so stalls fail fast.
    pub fn fast_settings() -> ClientSettings {
        ClientSettings::default()
            .with_attempt_timeout(Duration::from_millis(250))
            .with_connect_timeout(Duration::from_millis(250))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Tether error shapes.

    use super::*;

    /// Assert that a call gave up after exactly `attempts` attempts.
    #[track_caller]
    pub fn assert_budget_exhausted<T: std::fmt::Debug>(
        result: &TetherResult<T>,
        operation: Operation,
        attempts: u32,
    ) {
        match result {
            Err(TetherError::BudgetExhausted {
                operation: op,
                attempts: n,
                ..
            }) => {
                assert_eq!(*op, operation, "Wrong operation in BudgetExhausted");
                assert_eq!(*n, attempts, "Wrong attempt count in BudgetExhausted");
            }
            other => panic!("Expected BudgetExhausted, got: {:?}", other),
        }
    }

    /// Assert that a result is a specific config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &TetherResult<T>, expected: ConfigError) {
        match result {
            Err(TetherError::Config(err)) => assert_eq!(*err, expected),
            other => panic!("Expected Config error {:?}, got: {:?}", expected, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::statement::{create_table, select_value};
    use tether_core::TableName;

    #[tokio::test]
    async fn test_faults_skip_provisioning_and_drain_in_order() {
        let backend = ScriptedBackend::new();
        backend
            .fail_next(1, Fault::SessionExpired)
            .fail_next(1, Fault::transient());
        let conn = backend
            .connect(fixtures::TEST_ENDPOINT, &AuthToken::new("t"))
            .await
            .unwrap();
        let table = TableName::for_user(&uuid::Uuid::now_v7());

        conn.execute(&create_table(&table)).await.unwrap();
        assert!(conn
            .execute(&select_value(&table, "k"))
            .await
            .unwrap_err()
            .is_session_expired());
        assert!(!conn
            .execute(&select_value(&table, "k"))
            .await
            .unwrap_err()
            .is_session_expired());
        assert!(conn.execute(&select_value(&table, "k")).await.is_ok());

        assert_eq!(backend.provision_executes(), 1);
        assert_eq!(backend.data_executes(), 3);
    }

    #[tokio::test]
    async fn test_connect_failures_are_counted_down() {
        let backend = ScriptedBackend::new();
        backend.fail_connects(1);
        let token = AuthToken::new("t");
        assert!(backend.connect(fixtures::TEST_ENDPOINT, &token).await.is_err());
        assert!(backend.connect(fixtures::TEST_ENDPOINT, &token).await.is_ok());
        assert_eq!(backend.connects(), 1);
    }

    #[test]
    fn test_invalid_baton_fault_is_session_expired() {
        assert!(Fault::InvalidBaton.error().unwrap().is_session_expired());
    }
}
