//! Shared client construction for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use tether_client::{ErrorPolicy, InitOutcome, KvClient};
use tether_core::{AuthToken, ClientSettings, Statement, TableName};
use tether_storage::Backend;
use tether_test_utils::fixtures;
use tether_test_utils::{MemoryConfigStore, ScriptedBackend};
use tokio::runtime::Runtime;

pub fn test_runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create runtime")
}

pub fn test_client(store: Arc<MemoryConfigStore>, backend: &ScriptedBackend) -> KvClient {
    test_client_with(store, backend, ClientSettings::default())
}

pub fn test_client_with(
    store: Arc<MemoryConfigStore>,
    backend: &ScriptedBackend,
    settings: ClientSettings,
) -> KvClient {
    KvClient::new(store, Arc::new(backend.clone()), settings).expect("valid client settings")
}

/// An enabled client that has already connected and provisioned its table.
pub async fn ready_client(backend: &ScriptedBackend) -> KvClient {
    ready_client_with(backend, ClientSettings::default()).await
}

pub async fn ready_client_with(backend: &ScriptedBackend, settings: ClientSettings) -> KvClient {
    let client = test_client_with(fixtures::enabled_store(), backend, settings);
    let outcome = client
        .init(ErrorPolicy::Propagate)
        .await
        .expect("init succeeds");
    assert_eq!(outcome, InitOutcome::Initialized);
    client
}

/// Number of rows in a table, read around the client.
pub async fn row_count(backend: &ScriptedBackend, table: &TableName) -> String {
    let conn = backend
        .connect(fixtures::TEST_ENDPOINT, &AuthToken::new(fixtures::TEST_TOKEN))
        .await
        .expect("connect");
    conn.execute(&Statement::new(format!(
        "SELECT count(*) FROM {}",
        table.quoted()
    )))
    .await
    .expect("count rows")
    .concat_values()
}
