//! The key-value client.
//!
//! [`KvClient`] ties the configuration cache, the connection manager and the
//! retry executor together. It is cheap to clone; clones share one
//! connection.

use std::sync::{Arc, Mutex, PoisonError};
use tether_core::statement::{select_value, upsert_value};
use tether_core::{
    AuthToken, ClientSettings, ErrorPolicy, Operation, TetherResult, UserId,
};
use tether_storage::{Backend, ConfigStore};
use tokio::task::JoinHandle;

use crate::config_cache::{ConfigCache, ConfigField, UserIdentity};
use crate::executor::RetryExecutor;
use crate::lifecycle::{ConnectionManager, InitOutcome};

/// Result of [`KvClient::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLookup {
    /// The concatenated values stored under the key.
    Found(String),
    /// The read succeeded and returned no rows.
    Missing,
    /// The feature is disabled; nothing was sent.
    Disabled,
    /// The read was abandoned after a logged failure.
    Unavailable,
}

impl KeyLookup {
    pub fn into_value(self) -> Option<String> {
        match self {
            KeyLookup::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// Result of [`KvClient::store_key_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    /// The feature is disabled; nothing was sent.
    Disabled,
    /// The write was abandoned after a logged failure.
    Abandoned,
}

struct ClientInner {
    config: Arc<ConfigCache>,
    manager: Arc<ConnectionManager>,
    executor: RetryExecutor,
    pending_init: Mutex<Option<JoinHandle<TetherResult<InitOutcome>>>>,
}

/// Resilient key-value client.
#[derive(Clone)]
pub struct KvClient {
    inner: Arc<ClientInner>,
}

impl KvClient {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        backend: Arc<dyn Backend>,
        settings: ClientSettings,
    ) -> TetherResult<Self> {
        settings.validate()?;
        let config = Arc::new(ConfigCache::new(store));
        let manager = Arc::new(ConnectionManager::new(
            backend,
            Arc::clone(&config),
            settings.clone(),
        ));
        let executor = RetryExecutor::new(Arc::clone(&manager), settings);
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                manager,
                executor,
                pending_init: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ConfigCache {
        &self.inner.config
    }

    pub fn connection_manager(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    /// (Re)initialize the connection. See [`ConnectionManager::init`].
    pub async fn init(&self, policy: ErrorPolicy) -> TetherResult<InitOutcome> {
        self.inner.manager.init(policy).await
    }

    /// Drop the connection and forget cached secrets.
    pub async fn dispose(&self) {
        self.inner.manager.dispose().await;
    }

    /// Persist the enabled flag.
    ///
    /// Enabling starts an initialization in the background (await it with
    /// [`KvClient::wait_for_pending_init`]); disabling disposes the
    /// connection.
    pub async fn set_enabled(&self, enabled: bool) -> TetherResult<()> {
        self.inner.config.set(ConfigField::Enabled(enabled))?;
        if enabled {
            let manager = Arc::clone(&self.inner.manager);
            let handle = tokio::spawn(async move { manager.init(ErrorPolicy::Swallow).await });
            let previous = self
                .inner
                .pending_init
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(handle);
            if previous.is_some() {
                tracing::debug!("Superseding earlier background initialization");
            }
        } else {
            self.dispose().await;
        }
        Ok(())
    }

    /// Wait for the initialization started by [`KvClient::set_enabled`], if
    /// one is outstanding.
    pub async fn wait_for_pending_init(&self) -> Option<InitOutcome> {
        let handle = self
            .inner
            .pending_init
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        match handle.await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(_)) => Some(InitOutcome::Failed),
            Err(e) => {
                tracing::error!(error = %e, highlighted = true, "Background initialization task failed");
                Some(InitOutcome::Failed)
            }
        }
    }

    /// Persist the endpoint. Takes effect on the next [`KvClient::init`].
    pub fn set_endpoint(&self, endpoint: impl Into<String>) -> TetherResult<bool> {
        self.inner.config.set(ConfigField::Endpoint(endpoint.into()))
    }

    /// Persist the auth token. Takes effect on the next [`KvClient::init`].
    pub fn set_token(&self, token: AuthToken) -> TetherResult<bool> {
        self.inner.config.set(ConfigField::Token(token))
    }

    /// Persist the user id. Takes effect on the next [`KvClient::init`].
    pub fn set_user_id(&self, user_id: UserId) -> TetherResult<bool> {
        self.inner.config.set(ConfigField::UserId(user_id))
    }

    pub fn user(&self) -> TetherResult<UserIdentity> {
        self.inner.config.user()
    }

    /// Read the value stored under `key`.
    ///
    /// `None` when the feature is disabled, the key is absent, or the read
    /// was abandoned. Use [`KvClient::lookup`] to tell these apart.
    pub async fn query_key(&self, key: &str, policy: ErrorPolicy) -> TetherResult<Option<String>> {
        Ok(self.lookup(key, policy).await?.into_value())
    }

    pub async fn lookup(&self, key: &str, policy: ErrorPolicy) -> TetherResult<KeyLookup> {
        if !self.inner.config.is_enabled() {
            return Ok(KeyLookup::Disabled);
        }
        let rows = self
            .inner
            .executor
            .run(Operation::Read, key, policy, |table| select_value(table, key))
            .await?;
        Ok(match rows {
            None => KeyLookup::Unavailable,
            Some(rows) if rows.is_empty() => KeyLookup::Missing,
            Some(rows) => KeyLookup::Found(rows.concat_values()),
        })
    }

    /// Insert or overwrite the value stored under `key`.
    pub async fn store_key_value(
        &self,
        key: &str,
        value: &str,
        policy: ErrorPolicy,
    ) -> TetherResult<WriteOutcome> {
        if !self.inner.config.is_enabled() {
            return Ok(WriteOutcome::Disabled);
        }
        let rows = self
            .inner
            .executor
            .run(Operation::Write, key, policy, |table| {
                upsert_value(table, key, value)
            })
            .await?;
        Ok(match rows {
            Some(_) => WriteOutcome::Stored,
            None => WriteOutcome::Abandoned,
        })
    }
}
