//! Persisted connection settings.
//!
//! The store is the source of truth for the enabled flag, endpoint, auth
//! token and user id. Values survive process restarts; the client only
//! caches them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tether_core::{new_user_id, AuthToken, ClientSettings, StoreError, UserId};

/// Result type alias for config store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persisted configuration contract.
///
/// Getters are infallible and answer from the store's in-memory view;
/// setters write through to durable storage.
pub trait ConfigStore: Send + Sync {
    /// Re-read persisted values, picking up edits made outside this process.
    fn reload(&self) -> StoreResult<()>;

    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool) -> StoreResult<()>;

    fn endpoint(&self) -> String;
    fn set_endpoint(&self, endpoint: &str) -> StoreResult<()>;

    fn token(&self) -> AuthToken;
    fn set_token(&self, token: &AuthToken) -> StoreResult<()>;

    /// Return the persisted user id, creating and persisting a UUIDv7 when
    /// none exists yet.
    fn get_or_create_user_id(&self) -> StoreResult<UserId>;
    fn set_user_id(&self, user_id: UserId) -> StoreResult<()>;
}

/// On-disk shape of the settings file.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub token: String,
    pub user_id: Option<UserId>,
    /// Retry and timeout tuning for the client.
    pub client: ClientSettings,
}

impl std::fmt::Debug for PersistedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedConfig")
            .field("enabled", &self.enabled)
            .field("endpoint", &self.endpoint)
            .field("token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("client", &self.client)
            .finish()
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Config store that lives only as long as the process. Used by tests and
/// by hosts that persist settings themselves.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    state: RwLock<PersistedConfig>,
    writes: RwLock<u64>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PersistedConfig) -> Self {
        Self {
            state: RwLock::new(config),
            writes: RwLock::new(0),
        }
    }

    /// Replace the stored values, as an external editor would.
    pub fn replace(&self, config: PersistedConfig) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn snapshot(&self) -> PersistedConfig {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of write-through calls received.
    pub fn write_count(&self) -> u64 {
        *self.writes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, apply: impl FnOnce(&mut PersistedConfig)) -> StoreResult<()> {
        apply(&mut self.state.write().unwrap_or_else(PoisonError::into_inner));
        *self.writes.write().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

impl ConfigStore for MemoryConfigStore {
    fn reload(&self) -> StoreResult<()> {
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.snapshot().enabled
    }

    fn set_enabled(&self, enabled: bool) -> StoreResult<()> {
        self.update(|c| c.enabled = enabled)
    }

    fn endpoint(&self) -> String {
        self.snapshot().endpoint
    }

    fn set_endpoint(&self, endpoint: &str) -> StoreResult<()> {
        self.update(|c| c.endpoint = endpoint.to_string())
    }

    fn token(&self) -> AuthToken {
        AuthToken::new(self.snapshot().token)
    }

    fn set_token(&self, token: &AuthToken) -> StoreResult<()> {
        self.update(|c| c.token = token.expose().to_string())
    }

    fn get_or_create_user_id(&self) -> StoreResult<UserId> {
        if let Some(id) = self.snapshot().user_id {
            return Ok(id);
        }
        let id = new_user_id();
        self.update(|c| {
            c.user_id.get_or_insert(id);
        })?;
        Ok(self.snapshot().user_id.unwrap_or(id))
    }

    fn set_user_id(&self, user_id: UserId) -> StoreResult<()> {
        self.update(|c| c.user_id = Some(user_id))
    }
}

// ============================================================================
// TOML FILE STORE
// ============================================================================

/// Config store persisted as a TOML file.
///
/// A missing file reads as defaults (disabled, nothing configured). Every
/// setter rewrites the whole file through a temporary sibling and a rename.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    state: RwLock<PersistedConfig>,
}

impl FileConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let state = read_config(&path)?;
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> PersistedConfig {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Client tuning stored in the `[client]` table.
    pub fn client_settings(&self) -> ClientSettings {
        self.snapshot().client
    }

    fn update(&self, apply: impl FnOnce(&mut PersistedConfig)) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut next = state.clone();
        apply(&mut next);
        write_config(&self.path, &next)?;
        *state = next;
        Ok(())
    }
}

impl ConfigStore for FileConfigStore {
    fn reload(&self) -> StoreResult<()> {
        let fresh = read_config(&self.path)?;
        *self.state.write().map_err(|_| StoreError::LockPoisoned)? = fresh;
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.snapshot().enabled
    }

    fn set_enabled(&self, enabled: bool) -> StoreResult<()> {
        self.update(|c| c.enabled = enabled)
    }

    fn endpoint(&self) -> String {
        self.snapshot().endpoint
    }

    fn set_endpoint(&self, endpoint: &str) -> StoreResult<()> {
        self.update(|c| c.endpoint = endpoint.to_string())
    }

    fn token(&self) -> AuthToken {
        AuthToken::new(self.snapshot().token)
    }

    fn set_token(&self, token: &AuthToken) -> StoreResult<()> {
        self.update(|c| c.token = token.expose().to_string())
    }

    fn get_or_create_user_id(&self) -> StoreResult<UserId> {
        if let Some(id) = self.snapshot().user_id {
            return Ok(id);
        }
        let mut created = new_user_id();
        self.update(|c| created = *c.user_id.get_or_insert(created))?;
        tracing::info!(path = %self.path.display(), "Created new user id");
        Ok(created)
    }

    fn set_user_id(&self, user_id: UserId) -> StoreResult<()> {
        self.update(|c| c.user_id = Some(user_id))
    }
}

fn read_config(path: &Path) -> StoreResult<PersistedConfig> {
    if !path.exists() {
        return Ok(PersistedConfig::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| StoreError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    toml::from_str(&contents).map_err(|e| StoreError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn write_config(path: &Path, config: &PersistedConfig) -> StoreResult<()> {
    let write_err = |reason: String| StoreError::Write {
        path: path.display().to_string(),
        reason,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }
    let contents = toml::to_string_pretty(config).map_err(|e| write_err(e.to_string()))?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, contents).map_err(|e| write_err(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| write_err(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_user_id_is_stable() {
        let store = MemoryConfigStore::new();
        let first = store.get_or_create_user_id().unwrap();
        let second = store.get_or_create_user_id().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.get_version_num(), 7);
    }

    #[test]
    fn test_memory_store_counts_writes() {
        let store = MemoryConfigStore::new();
        store.set_enabled(true).unwrap();
        store.set_endpoint("https://db.example").unwrap();
        assert_eq!(store.write_count(), 2);
        assert!(store.enabled());
    }

    #[test]
    fn test_missing_file_reads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::open(dir.path().join("tether.toml")).unwrap();
        assert!(!store.enabled());
        assert!(store.endpoint().is_empty());
        assert!(store.token().is_empty());
        assert_eq!(store.client_settings(), ClientSettings::default());
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tether.toml");
        let user_id = {
            let store = FileConfigStore::open(&path).unwrap();
            store.set_enabled(true).unwrap();
            store.set_endpoint("libsql://settings.example.io").unwrap();
            store.set_token(&AuthToken::new("tok")).unwrap();
            store.get_or_create_user_id().unwrap()
        };

        let reopened = FileConfigStore::open(&path).unwrap();
        assert!(reopened.enabled());
        assert_eq!(reopened.endpoint(), "libsql://settings.example.io");
        assert_eq!(reopened.token().expose(), "tok");
        assert_eq!(reopened.get_or_create_user_id().unwrap(), user_id);
    }

    #[test]
    fn test_reload_picks_up_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        let store = FileConfigStore::open(&path).unwrap();
        store.set_endpoint("https://a.example").unwrap();

        std::fs::write(&path, "enabled = true\nendpoint = \"https://b.example\"\n").unwrap();
        assert_eq!(store.endpoint(), "https://a.example");
        store.reload().unwrap();
        assert_eq!(store.endpoint(), "https://b.example");
        assert!(store.enabled());
    }

    #[test]
    fn test_client_table_overrides_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, "[client]\nwrite_attempts = 7\n").unwrap();
        let store = FileConfigStore::open(&path).unwrap();
        assert_eq!(store.client_settings().write_attempts, 7);
        assert_eq!(store.client_settings().read_attempts, 3);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, "enabled = maybe").unwrap();
        assert!(matches!(
            FileConfigStore::open(&path),
            Err(StoreError::Parse { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = PersistedConfig {
            token: "super-secret".to_string(),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("super-secret"));
    }
}
