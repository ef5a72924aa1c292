//! Database backend traits.
//!
//! A [`Backend`] opens connections; a [`Connection`] executes one
//! parameterized statement at a time and returns its rows. Failures surface
//! as [`BackendError`]s whose text the client inspects to decide between
//! reconnecting and plain retrying.

use async_trait::async_trait;
use std::sync::Arc;
use tether_core::{AuthToken, BackendError, ClientSettings, RowSet, Statement};

use crate::hrana::HranaBackend;
use crate::sqlite::SqliteBackend;

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Opens connections to a database.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open a connection to `endpoint`, authenticated with `token`.
    async fn connect(
        &self,
        endpoint: &str,
        token: &AuthToken,
    ) -> BackendResult<Arc<dyn Connection>>;
}

/// A live database connection.
///
/// Implementations must be safe to share between tasks; each call to
/// `execute` is a self-contained statement.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn execute(&self, statement: &Statement) -> BackendResult<RowSet>;
}

/// Whether an endpoint names a local SQLite database rather than a server.
pub fn is_local_endpoint(endpoint: &str) -> bool {
    let endpoint = endpoint.trim();
    endpoint.starts_with("file:") || endpoint == ":memory:"
}

/// Backend that picks SQLite for `file:` endpoints and Hrana over HTTP for
/// everything else.
pub struct RoutingBackend {
    local: SqliteBackend,
    remote: HranaBackend,
}

impl RoutingBackend {
    pub fn new(settings: &ClientSettings) -> BackendResult<Self> {
        Ok(Self {
            local: SqliteBackend::new(),
            remote: HranaBackend::new(settings)?,
        })
    }
}

#[async_trait]
impl Backend for RoutingBackend {
    async fn connect(
        &self,
        endpoint: &str,
        token: &AuthToken,
    ) -> BackendResult<Arc<dyn Connection>> {
        if is_local_endpoint(endpoint) {
            self.local.connect(endpoint, token).await
        } else {
            self.remote.connect(endpoint, token).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_endpoint_detection() {
        assert!(is_local_endpoint("file:settings.db"));
        assert!(is_local_endpoint("file:///var/lib/tether/settings.db"));
        assert!(is_local_endpoint(":memory:"));
        assert!(!is_local_endpoint("libsql://settings-org.turso.io"));
        assert!(!is_local_endpoint("https://db.example"));
    }

    #[tokio::test]
    async fn test_routing_backend_opens_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = format!("file:{}", dir.path().join("routed.db").display());
        let backend = RoutingBackend::new(&ClientSettings::default()).unwrap();
        let conn = backend
            .connect(&endpoint, &AuthToken::new("unused"))
            .await
            .unwrap();
        let rows = conn.execute(&Statement::new("SELECT 1")).await.unwrap();
        assert_eq!(rows.concat_values(), "1");
    }
}
