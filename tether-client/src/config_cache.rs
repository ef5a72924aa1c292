//! In-memory view of the persisted connection settings.
//!
//! Fields are read from the [`ConfigStore`] on first use (or on an explicit
//! [`ConfigCache::load`]) and written through on [`ConfigCache::set`]. Any
//! change to a setting that affects the connection bumps the needs-init
//! epoch, so the next initialization reconnects and provisions the table
//! again.

use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use tether_core::{AuthToken, NamespaceId, TableName, TetherResult, UserId};
use tether_storage::ConfigStore;

/// A user id together with the namespace and table derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: UserId,
    pub namespace: NamespaceId,
    pub table: TableName,
}

impl UserIdentity {
    pub fn new(user_id: UserId) -> Self {
        let namespace = NamespaceId::derive(&user_id);
        let table = TableName::for_namespace(&namespace);
        Self {
            user_id,
            namespace,
            table,
        }
    }
}

/// One settable configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigField {
    Enabled(bool),
    Endpoint(String),
    Token(AuthToken),
    UserId(UserId),
}

impl ConfigField {
    fn name(&self) -> &'static str {
        match self {
            ConfigField::Enabled(_) => "enabled",
            ConfigField::Endpoint(_) => "endpoint",
            ConfigField::Token(_) => "token",
            ConfigField::UserId(_) => "user_id",
        }
    }
}

/// Snapshot of the needs-first-init flag and the epoch it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitEpoch {
    pub needs_first_init: bool,
    pub epoch: u64,
}

#[derive(Debug)]
struct CachedConfig {
    enabled: Option<bool>,
    endpoint: Option<String>,
    token: Option<AuthToken>,
    user: Option<UserIdentity>,
    needs_first_init: bool,
    epoch: u64,
}

impl CachedConfig {
    fn mark_stale(&mut self) {
        self.needs_first_init = true;
        self.epoch += 1;
    }
}

/// Lazily loaded, write-through cache of the connection settings.
pub struct ConfigCache {
    store: Arc<dyn ConfigStore>,
    state: RwLock<CachedConfig>,
}

impl ConfigCache {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            state: RwLock::new(CachedConfig {
                enabled: None,
                endpoint: None,
                token: None,
                user: None,
                needs_first_init: true,
                epoch: 0,
            }),
        }
    }

    fn state(&self) -> RwLockWriteGuard<'_, CachedConfig> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reload the store and refresh every cached field from it. A field whose
    /// persisted value differs from the cached one marks the connection stale.
    pub fn load(&self) -> TetherResult<()> {
        self.store.reload()?;
        let enabled = self.store.enabled();
        let endpoint = self.store.endpoint();
        let token = self.store.token();
        let has_user = self.state().user.is_some();
        let user_id = if has_user {
            Some(self.store.get_or_create_user_id()?)
        } else {
            None
        };

        let mut state = self.state();
        let mut changed = state.enabled.is_some_and(|cached| cached != enabled);
        changed |= state.endpoint.as_ref().is_some_and(|cached| *cached != endpoint);
        changed |= state.token.as_ref().is_some_and(|cached| *cached != token);
        state.enabled = Some(enabled);
        state.endpoint = Some(endpoint);
        state.token = Some(token);
        if let Some(user_id) = user_id {
            if state.user.as_ref().map(|u| u.user_id) != Some(user_id) {
                changed |= state.user.is_some();
                state.user = Some(UserIdentity::new(user_id));
            }
        }
        if changed {
            tracing::debug!("Persisted settings changed, connection marked stale");
            state.mark_stale();
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        if let Some(enabled) = self.state.read().unwrap_or_else(PoisonError::into_inner).enabled {
            return enabled;
        }
        let enabled = self.store.enabled();
        *self.state().enabled.get_or_insert(enabled)
    }

    pub fn endpoint(&self) -> String {
        if let Some(endpoint) = &self.state.read().unwrap_or_else(PoisonError::into_inner).endpoint {
            return endpoint.clone();
        }
        let endpoint = self.store.endpoint();
        self.state().endpoint.get_or_insert(endpoint).clone()
    }

    pub fn token(&self) -> AuthToken {
        if let Some(token) = &self.state.read().unwrap_or_else(PoisonError::into_inner).token {
            return token.clone();
        }
        let token = self.store.token();
        self.state().token.get_or_insert(token).clone()
    }

    /// The user identity, creating and persisting a new user id on first use.
    pub fn user(&self) -> TetherResult<UserIdentity> {
        if let Some(user) = &self.state.read().unwrap_or_else(PoisonError::into_inner).user {
            return Ok(user.clone());
        }
        let user_id = self.store.get_or_create_user_id()?;
        Ok(self
            .state()
            .user
            .get_or_insert_with(|| UserIdentity::new(user_id))
            .clone())
    }

    /// Set one field. Returns whether the value changed.
    ///
    /// A changed value marks the connection stale before it is written
    /// through to the store and cached.
    pub fn set(&self, field: ConfigField) -> TetherResult<bool> {
        let changed = match &field {
            ConfigField::Enabled(v) => self.is_enabled() != *v,
            ConfigField::Endpoint(v) => self.endpoint() != *v,
            ConfigField::Token(v) => self.token() != *v,
            ConfigField::UserId(v) => self.user()?.user_id != *v,
        };
        if changed {
            self.state().mark_stale();
        }

        match &field {
            ConfigField::Enabled(v) => self.store.set_enabled(*v)?,
            ConfigField::Endpoint(v) => self.store.set_endpoint(v)?,
            ConfigField::Token(v) => self.store.set_token(v)?,
            ConfigField::UserId(v) => self.store.set_user_id(*v)?,
        }
        tracing::debug!(field = field.name(), changed, "Setting written");

        let mut state = self.state();
        match field {
            ConfigField::Enabled(v) => state.enabled = Some(v),
            ConfigField::Endpoint(v) => state.endpoint = Some(v),
            ConfigField::Token(v) => state.token = Some(v),
            ConfigField::UserId(v) => state.user = Some(UserIdentity::new(v)),
        }
        Ok(changed)
    }

    pub fn needs_first_init(&self) -> bool {
        self.init_epoch().needs_first_init
    }

    pub fn init_epoch(&self) -> InitEpoch {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        InitEpoch {
            needs_first_init: state.needs_first_init,
            epoch: state.epoch,
        }
    }

    /// Clear the needs-first-init flag after provisioning. Has no effect when
    /// a setting changed since `epoch` was read. Returns whether it cleared.
    pub fn mark_provisioned(&self, epoch: u64) -> bool {
        let mut state = self.state();
        if state.epoch != epoch {
            return false;
        }
        state.needs_first_init = false;
        true
    }

    /// Force provisioning on the next initialization.
    pub fn mark_stale(&self) {
        self.state().mark_stale();
    }

    /// Forget cached secrets and identity. Persisted values are untouched and
    /// are read again on next use.
    ///
    /// With nothing cached, a later [`ConfigCache::load`] has no baseline to
    /// compare against, so the connection is marked stale here.
    pub fn purge_secrets(&self) {
        let mut state = self.state();
        state.token = None;
        state.endpoint = None;
        state.user = None;
        state.mark_stale();
    }

    /// Whether any secret or identity is currently held in memory.
    pub fn holds_secrets(&self) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.token.is_some() || state.endpoint.is_some() || state.user.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_storage::{MemoryConfigStore, PersistedConfig};

    fn cache_with(config: PersistedConfig) -> (Arc<MemoryConfigStore>, ConfigCache) {
        let store = Arc::new(MemoryConfigStore::with_config(config));
        let cache = ConfigCache::new(store.clone());
        (store, cache)
    }

    #[test]
    fn test_fresh_cache_needs_first_init() {
        let (_, cache) = cache_with(PersistedConfig::default());
        assert!(cache.needs_first_init());
    }

    #[test]
    fn test_getters_load_lazily() {
        let (store, cache) = cache_with(PersistedConfig {
            enabled: true,
            endpoint: "https://db.example".to_string(),
            token: "tok".to_string(),
            ..Default::default()
        });
        assert!(!cache.holds_secrets());
        assert!(cache.is_enabled());
        assert_eq!(cache.endpoint(), "https://db.example");
        assert_eq!(cache.token().expose(), "tok");
        assert!(cache.holds_secrets());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_user_is_created_once_and_hashed() {
        let (store, cache) = cache_with(PersistedConfig::default());
        let user = cache.user().unwrap();
        assert_eq!(store.snapshot().user_id, Some(user.user_id));
        assert_eq!(user.namespace, NamespaceId::derive(&user.user_id));
        assert_eq!(cache.user().unwrap(), user);
    }

    #[test]
    fn test_set_changed_value_bumps_epoch_and_writes_through() {
        let (store, cache) = cache_with(PersistedConfig::default());
        let before = cache.init_epoch();
        assert!(cache.mark_provisioned(before.epoch));
        assert!(!cache.needs_first_init());

        let changed = cache
            .set(ConfigField::Endpoint("https://new.example".to_string()))
            .unwrap();
        assert!(changed);
        assert!(cache.needs_first_init());
        assert!(cache.init_epoch().epoch > before.epoch);
        assert_eq!(store.snapshot().endpoint, "https://new.example");
        assert_eq!(cache.endpoint(), "https://new.example");
    }

    #[test]
    fn test_set_same_value_keeps_epoch() {
        let (_, cache) = cache_with(PersistedConfig {
            token: "tok".to_string(),
            ..Default::default()
        });
        let epoch = cache.init_epoch().epoch;
        assert!(cache.mark_provisioned(epoch));
        let changed = cache.set(ConfigField::Token(AuthToken::new("tok"))).unwrap();
        assert!(!changed);
        assert!(!cache.needs_first_init());
    }

    #[test]
    fn test_set_user_id_rederives_table() {
        let (_, cache) = cache_with(PersistedConfig::default());
        let original = cache.user().unwrap();
        let replacement = tether_core::new_user_id();
        assert!(cache.set(ConfigField::UserId(replacement)).unwrap());
        let user = cache.user().unwrap();
        assert_eq!(user.user_id, replacement);
        assert_ne!(user.table, original.table);
    }

    #[test]
    fn test_stale_epoch_is_not_cleared_by_old_provisioning() {
        let (_, cache) = cache_with(PersistedConfig::default());
        let snapshot = cache.init_epoch();
        cache.set(ConfigField::Enabled(true)).unwrap();
        assert!(!cache.mark_provisioned(snapshot.epoch));
        assert!(cache.needs_first_init());
    }

    #[test]
    fn test_load_detects_external_change() {
        let (store, cache) = cache_with(PersistedConfig {
            endpoint: "https://a.example".to_string(),
            ..Default::default()
        });
        cache.load().unwrap();
        let epoch = cache.init_epoch().epoch;
        cache.mark_provisioned(epoch);

        store.replace(PersistedConfig {
            endpoint: "https://b.example".to_string(),
            ..Default::default()
        });
        cache.load().unwrap();
        assert_eq!(cache.endpoint(), "https://b.example");
        assert!(cache.needs_first_init());
    }

    #[test]
    fn test_purge_secrets_keeps_persisted_values() {
        let (store, cache) = cache_with(PersistedConfig {
            enabled: true,
            endpoint: "https://db.example".to_string(),
            token: "tok".to_string(),
            ..Default::default()
        });
        let user = cache.user().unwrap();
        cache.token();
        let epoch = cache.init_epoch().epoch;
        assert!(cache.mark_provisioned(epoch));
        cache.purge_secrets();
        assert!(!cache.holds_secrets());
        assert!(cache.needs_first_init());
        assert_eq!(store.snapshot().token, "tok");
        assert_eq!(cache.user().unwrap().user_id, user.user_id);
    }
}
