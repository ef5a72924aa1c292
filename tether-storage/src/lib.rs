//! Tether Storage - Config Stores and Database Backends
//!
//! Defines the two collaborator contracts the client is built on:
//! [`ConfigStore`] for persisted connection settings and [`Backend`] /
//! [`Connection`] for executing statements. Ships a TOML file store, an
//! in-memory store, a Hrana-over-HTTP backend for remote libSQL servers and
//! a SQLite backend for local databases.

pub mod backend;
pub mod config_store;
pub mod hrana;
pub mod sqlite;

pub use backend::{is_local_endpoint, Backend, BackendResult, Connection, RoutingBackend};
pub use config_store::{
    ConfigStore, FileConfigStore, MemoryConfigStore, PersistedConfig, StoreResult,
};
pub use hrana::{http_base_url, HranaBackend, HranaConnection};
pub use sqlite::{SqliteBackend, SqliteConnection};
