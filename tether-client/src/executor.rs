//! Classified retry around a single remote statement.
//!
//! Every failed attempt is sorted into one of three cases:
//!
//! | Failure                        | Attempts left | Action                              |
//! |--------------------------------|---------------|-------------------------------------|
//! | session expired                | yes           | single-flight reconnect, retry      |
//! | anything else                  | yes           | log, retry (reads stop, see below)  |
//! | any                            | no            | log, absent / no-op or propagate    |
//!
//! Reads stop after the first generic failure when
//! [`ClientSettings::read_stops_on_transient`] is set (the default). Writes
//! always use their whole budget.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tether_core::{
    BackendError, ClientSettings, ErrorPolicy, Operation, RowSet, Statement, TableName,
    TetherError, TetherResult,
};
use tokio::time::timeout;
use tracing::Instrument;

use crate::lifecycle::ConnectionManager;

/// Runs statements against the managed connection with the retry policy.
pub struct RetryExecutor {
    manager: Arc<ConnectionManager>,
    settings: ClientSettings,
    calls: AtomicU64,
}

impl RetryExecutor {
    pub fn new(manager: Arc<ConnectionManager>, settings: ClientSettings) -> Self {
        Self {
            manager,
            settings,
            calls: AtomicU64::new(0),
        }
    }

    /// Attempt budget for an operation.
    pub fn budget(&self, operation: Operation) -> u32 {
        match operation {
            Operation::Read => self.settings.read_attempts,
            Operation::Write => self.settings.write_attempts,
        }
    }

    /// Run the statement produced by `build` until it succeeds or the policy
    /// gives up.
    ///
    /// `build` is called once per attempt with the table of the connection
    /// that attempt uses. `Ok(None)` means the call was abandoned and the
    /// failure logged; with [`ErrorPolicy::Propagate`] an exhausted budget is
    /// returned as [`TetherError::BudgetExhausted`] instead.
    pub async fn run<F>(
        &self,
        operation: Operation,
        key: &str,
        policy: ErrorPolicy,
        build: F,
    ) -> TetherResult<Option<RowSet>>
    where
        F: Fn(&TableName) -> Statement,
    {
        let call_id = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let span = tracing::debug_span!("kv_call", call_id, %operation, key);
        async {
            let started = Instant::now();
            let result = self.run_attempts(operation, key, policy, &build).await;
            tracing::debug!(
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                completed = matches!(result, Ok(Some(_))),
                "{operation} finished"
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn run_attempts<F>(
        &self,
        operation: Operation,
        key: &str,
        policy: ErrorPolicy,
        build: &F,
    ) -> TetherResult<Option<RowSet>>
    where
        F: Fn(&TableName) -> Statement,
    {
        let budget = self.budget(operation);
        let mut expiry_seen = false;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let (generation, result) = self.attempt(build).await;
            let err = match result {
                Ok(rows) => return Ok(Some(rows)),
                Err(err) => err,
            };

            if attempt >= budget {
                tracing::error!(
                    key,
                    attempt,
                    error = %err,
                    highlighted = true,
                    "Error when executing {operation}, giving up"
                );
                return if policy.propagates() {
                    Err(TetherError::BudgetExhausted {
                        operation,
                        attempts: attempt,
                        source: err,
                    })
                } else {
                    Ok(None)
                };
            }

            if err.is_session_expired() {
                if expiry_seen {
                    tracing::error!(
                        key,
                        attempt,
                        error = %err,
                        highlighted = true,
                        "Database stream expired, retrying"
                    );
                } else {
                    tracing::debug!(key, attempt, "Database stream expired, reconnecting");
                }
                expiry_seen = true;
                if !self.manager.reconnect(generation).await {
                    tracing::debug!(key, attempt, "Reconnect failed, retrying anyway");
                }
                continue;
            }

            tracing::error!(
                key,
                attempt,
                error = %err,
                highlighted = true,
                "Error when executing {operation}, retrying"
            );
            if operation == Operation::Read && self.settings.read_stops_on_transient {
                return Ok(None);
            }
        }
    }

    /// One attempt. Returns the generation of the connection it used so a
    /// reconnect can tell whether someone else already replaced it.
    async fn attempt<F>(&self, build: &F) -> (u64, Result<RowSet, BackendError>)
    where
        F: Fn(&TableName) -> Statement,
    {
        let Some(active) = self.manager.current() else {
            return (self.manager.generation(), Err(BackendError::NotConnected));
        };
        let statement = build(&active.table);
        let after = self.settings.attempt_timeout();
        let result = match timeout(after, active.connection.execute(&statement)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout { after }),
        };
        (active.generation, result)
    }
}
