//! SQLite backend for local databases.
//!
//! `file:` endpoints are opened as SQLite URIs. [`SqliteBackend::in_memory`]
//! gives a private in-memory database that outlives individual connections,
//! so reconnecting does not lose rows.

use async_trait::async_trait;
use rusqlite::types::{Value, ValueRef};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_core::{AuthToken, BackendError, RowSet, SqlValue, Statement};

use crate::backend::{Backend, BackendResult, Connection};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed [`Backend`]. The auth token is accepted and ignored.
#[derive(Default)]
pub struct SqliteBackend {
    shared: Option<Arc<Mutex<rusqlite::Connection>>>,
}

impl SqliteBackend {
    /// Backend that opens the database named by each endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend bound to one in-memory database, whatever the endpoint.
    pub fn in_memory() -> BackendResult<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| BackendError::Connect {
            endpoint: ":memory:".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            shared: Some(Arc::new(Mutex::new(conn))),
        })
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn connect(
        &self,
        endpoint: &str,
        _token: &AuthToken,
    ) -> BackendResult<Arc<dyn Connection>> {
        if let Some(shared) = &self.shared {
            return Ok(Arc::new(SqliteConnection {
                inner: Arc::clone(shared),
            }));
        }

        let target = endpoint.trim().to_string();
        if target.is_empty() {
            return Err(BackendError::Connect {
                endpoint: target,
                reason: "empty endpoint".to_string(),
            });
        }
        let conn = tokio::task::spawn_blocking(move || open_file(&target))
            .await
            .map_err(|e| BackendError::Transport {
                reason: format!("sqlite open task failed: {e}"),
            })??;
        tracing::debug!(endpoint, "Opened sqlite database");
        Ok(Arc::new(SqliteConnection {
            inner: Arc::new(Mutex::new(conn)),
        }))
    }
}

fn open_file(target: &str) -> BackendResult<rusqlite::Connection> {
    let connect_err = |e: rusqlite::Error| BackendError::Connect {
        endpoint: target.to_string(),
        reason: e.to_string(),
    };
    // Default open flags include SQLITE_OPEN_URI, so `file:` endpoints are
    // parsed as URIs.
    let conn = rusqlite::Connection::open(target).map_err(connect_err)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(connect_err)?;
    Ok(conn)
}

/// Connection to a SQLite database.
pub struct SqliteConnection {
    inner: Arc<Mutex<rusqlite::Connection>>,
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn execute(&self, statement: &Statement) -> BackendResult<RowSet> {
        let inner = Arc::clone(&self.inner);
        let statement = statement.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner.lock().map_err(|_| BackendError::Protocol {
                reason: "sqlite connection lock poisoned".to_string(),
            })?;
            run_statement(&conn, &statement)
        })
        .await
        .map_err(|e| BackendError::Transport {
            reason: format!("sqlite execute task failed: {e}"),
        })?
    }
}

fn run_statement(conn: &rusqlite::Connection, statement: &Statement) -> BackendResult<RowSet> {
    let mut stmt = conn.prepare(&statement.sql).map_err(statement_error)?;
    let params = rusqlite::params_from_iter(statement.params.iter().map(to_sqlite));

    if stmt.column_count() == 0 {
        let affected = stmt.execute(params).map_err(statement_error)?;
        return Ok(RowSet::default().with_rows_affected(affected as u64));
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut rows = stmt.query(params).map_err(statement_error)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(statement_error)? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(from_sqlite(row.get_ref(idx).map_err(statement_error)?));
        }
        out.push(values);
    }
    Ok(RowSet::new(columns, out))
}

fn statement_error(err: rusqlite::Error) -> BackendError {
    BackendError::Statement {
        code: err.sqlite_error_code().map(|code| format!("{:?}", code)),
        message: err.to_string(),
    }
}

fn to_sqlite(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::Blob(v) => Value::Blob(v.clone()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
    }
}
