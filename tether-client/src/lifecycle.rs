//! Connection lifecycle: open, provision, reconnect, dispose.
//!
//! The manager owns the single live connection. A successful init replaces
//! it with a new handle carrying a higher generation number; reconnects are
//! single-flight, so callers that saw the same broken generation share one
//! reconnect instead of each opening their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tether_core::statement::create_table;
use tether_core::{
    BackendError, ClientSettings, ConfigError, ErrorPolicy, TableName, TetherResult,
};
use tether_storage::{Backend, Connection};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config_cache::ConfigCache;

/// How an initialization ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// The feature is disabled; nothing was opened.
    Disabled,
    /// Connected and provisioned the user table.
    Initialized,
    /// Connected; the table was already provisioned in this epoch.
    Reinitialized,
    /// Failed and the error was logged and swallowed.
    Failed,
}

impl InitOutcome {
    pub fn is_connected(self) -> bool {
        matches!(self, InitOutcome::Initialized | InitOutcome::Reinitialized)
    }
}

/// The live connection and the table it serves.
#[derive(Clone)]
pub struct ActiveConnection {
    pub connection: Arc<dyn Connection>,
    pub table: TableName,
    pub generation: u64,
}

/// Owns the live connection.
pub struct ConnectionManager {
    backend: Arc<dyn Backend>,
    config: Arc<ConfigCache>,
    settings: ClientSettings,
    active: RwLock<Option<ActiveConnection>>,
    generation: AtomicU64,
    init_lock: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        config: Arc<ConfigCache>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            backend,
            config,
            settings,
            active: RwLock::new(None),
            generation: AtomicU64::new(0),
            init_lock: Mutex::new(()),
        }
    }

    /// The live connection, if any.
    pub fn current(&self) -> Option<ActiveConnection> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Generation of the most recently opened connection (0 before the first).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// (Re)initialize the connection.
    ///
    /// Reloads settings, then connects and provisions the user table when the
    /// feature is enabled. Safe to call repeatedly; calls are serialized.
    pub async fn init(&self, policy: ErrorPolicy) -> TetherResult<InitOutcome> {
        let _guard = self.init_lock.lock().await;
        self.init_locked(policy).await
    }

    /// Reconnect after a failure observed on connection `observed_generation`.
    ///
    /// When another caller already replaced that connection, returns `true`
    /// without opening a new one. Errors are logged and swallowed.
    pub async fn reconnect(&self, observed_generation: u64) -> bool {
        let _guard = self.init_lock.lock().await;
        if self.generation() != observed_generation {
            tracing::debug!(
                observed_generation,
                current_generation = self.generation(),
                "Connection already replaced by another caller"
            );
            return true;
        }
        matches!(
            self.init_locked(ErrorPolicy::Swallow).await,
            Ok(outcome) if outcome.is_connected()
        )
    }

    /// Drop the live connection and forget cached secrets. Persisted
    /// settings are untouched.
    pub async fn dispose(&self) {
        let _guard = self.init_lock.lock().await;
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.config.purge_secrets();
        tracing::debug!("Database connection disposed");
    }

    async fn init_locked(&self, policy: ErrorPolicy) -> TetherResult<InitOutcome> {
        let result = match self.config.load() {
            Ok(()) if !self.config.is_enabled() => {
                tracing::info!("Database functionality is disabled");
                return Ok(InitOutcome::Disabled);
            }
            Ok(()) => self.open().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    highlighted = true,
                    "Error when (re)initializing database system"
                );
                if policy.propagates() {
                    Err(e)
                } else {
                    Ok(InitOutcome::Failed)
                }
            }
        }
    }

    async fn open(&self) -> TetherResult<InitOutcome> {
        let epoch = self.config.init_epoch();
        let endpoint = self.config.endpoint();
        let token = self.config.token();
        let user = self.config.user()?;

        if endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint.into());
        }
        if token.is_empty() {
            return Err(ConfigError::MissingToken.into());
        }

        let connect_timeout = self.settings.connect_timeout();
        let connection = timeout(connect_timeout, self.backend.connect(&endpoint, &token))
            .await
            .map_err(|_| BackendError::Timeout {
                after: connect_timeout,
            })??;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let active = ActiveConnection {
            connection,
            table: user.table.clone(),
            generation,
        };
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(active.clone());

        if !epoch.needs_first_init {
            tracing::info!(generation, "Reinitializing database system");
            return Ok(InitOutcome::Reinitialized);
        }

        tracing::info!(generation, table = %active.table, "Initializing database system");
        let attempt_timeout = self.settings.attempt_timeout();
        timeout(
            attempt_timeout,
            active.connection.execute(&create_table(&active.table)),
        )
        .await
        .map_err(|_| BackendError::Timeout {
            after: attempt_timeout,
        })??;
        if !self.config.mark_provisioned(epoch.epoch) {
            tracing::debug!("Settings changed during provisioning, table will be provisioned again");
        }
        Ok(InitOutcome::Initialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_storage::{MemoryConfigStore, PersistedConfig, SqliteBackend};

    fn manager(config: PersistedConfig) -> (Arc<ConfigCache>, ConnectionManager) {
        let store = Arc::new(MemoryConfigStore::with_config(config));
        let cache = Arc::new(ConfigCache::new(store));
        let backend = Arc::new(SqliteBackend::in_memory().unwrap());
        let manager = ConnectionManager::new(backend, cache.clone(), ClientSettings::default());
        (cache, manager)
    }

    fn enabled_config() -> PersistedConfig {
        PersistedConfig {
            enabled: true,
            endpoint: "file:unused".to_string(),
            token: "tok".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_init_is_noop() {
        let (_, manager) = manager(PersistedConfig::default());
        let outcome = manager.init(ErrorPolicy::Propagate).await.unwrap();
        assert_eq!(outcome, InitOutcome::Disabled);
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn test_first_init_provisions_then_reinitializes() {
        let (cache, manager) = manager(enabled_config());
        assert_eq!(
            manager.init(ErrorPolicy::Propagate).await.unwrap(),
            InitOutcome::Initialized
        );
        assert!(!cache.needs_first_init());
        let first = manager.current().unwrap();

        assert_eq!(
            manager.init(ErrorPolicy::Propagate).await.unwrap(),
            InitOutcome::Reinitialized
        );
        let second = manager.current().unwrap();
        assert!(second.generation > first.generation);
        assert!(!Arc::ptr_eq(&first.connection, &second.connection));
    }

    #[tokio::test]
    async fn test_missing_token_propagates_config_error() {
        let (_, manager) = manager(PersistedConfig {
            token: String::new(),
            ..enabled_config()
        });
        let err = manager.init(ErrorPolicy::Propagate).await.unwrap_err();
        assert!(matches!(
            err,
            tether_core::TetherError::Config(ConfigError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn test_missing_endpoint_swallowed() {
        let (_, manager) = manager(PersistedConfig {
            endpoint: String::new(),
            ..enabled_config()
        });
        let outcome = manager.init(ErrorPolicy::Swallow).await.unwrap();
        assert_eq!(outcome, InitOutcome::Failed);
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn test_reconnect_is_single_flight() {
        let (_, manager) = manager(enabled_config());
        manager.init(ErrorPolicy::Propagate).await.unwrap();
        let observed = manager.generation();

        assert!(manager.reconnect(observed).await);
        let after_first = manager.generation();
        assert_eq!(after_first, observed + 1);

        // A second caller that saw the same broken generation reuses it.
        assert!(manager.reconnect(observed).await);
        assert_eq!(manager.generation(), after_first);
    }

    #[tokio::test]
    async fn test_dispose_clears_connection_and_secrets() {
        let (cache, manager) = manager(enabled_config());
        manager.init(ErrorPolicy::Propagate).await.unwrap();
        assert!(cache.holds_secrets());
        manager.dispose().await;
        assert!(manager.current().is_none());
        assert!(!cache.holds_secrets());
    }
}
