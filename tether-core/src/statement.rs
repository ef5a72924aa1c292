//! SQL statements issued against a per-user table.
//!
//! The text of each statement is fixed; only the table name (derived from
//! the user's namespace) and bound parameters vary.

use crate::{SqlValue, TableName};

/// A parameterized SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Idempotent provisioning of the key/value table.
pub fn create_table(table: &TableName) -> Statement {
    Statement::new(format!(
        "CREATE TABLE IF NOT EXISTS {} (Id INTEGER PRIMARY KEY AUTOINCREMENT, 'key' TEXT UNIQUE NOT NULL, 'value' TEXT)",
        table.quoted()
    ))
}

/// Read the value stored under `key`.
pub fn select_value(table: &TableName, key: &str) -> Statement {
    Statement::new(format!("SELECT value FROM {} WHERE key = ?", table.quoted())).bind(key)
}

/// Insert `key`, or overwrite its value when the key already exists.
pub fn upsert_value(table: &TableName, key: &str, value: &str) -> Statement {
    Statement::new(format!(
        "INSERT INTO {} (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = ?",
        table.quoted()
    ))
    .bind(key)
    .bind(value)
    .bind(value)
}
