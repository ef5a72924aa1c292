//! Tether Client - Resilient Key-Value Access
//!
//! Stores small string key/value pairs in a per-user table on a remote
//! libSQL server (or a local SQLite file), riding out expired sessions and
//! transient failures:
//!
//! - settings are loaded lazily and written through to a [`ConfigStore`];
//! - each user gets a table named from a one-way hash of their id;
//! - reads get 3 attempts and writes 5, with a single-flight reconnect when
//!   the server reports the session expired;
//! - writes are upserts, so retries never duplicate rows.
//!
//! [`ConfigStore`]: tether_storage::ConfigStore

pub mod client;
pub mod config_cache;
pub mod executor;
pub mod lifecycle;
pub mod telemetry;

pub use client::{KeyLookup, KvClient, WriteOutcome};
pub use config_cache::{ConfigCache, ConfigField, InitEpoch, UserIdentity};
pub use executor::RetryExecutor;
pub use lifecycle::{ActiveConnection, ConnectionManager, InitOutcome};
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};

pub use tether_core::{ErrorPolicy, Operation, TetherError, TetherResult};
