//! Connection registry for authenticated WebSocket clients
//!
//! The `ConnectionRegistry` is the single source of truth for which
//! connections are live and authenticated, and as whom. A connection enters
//! the registry when its access token is accepted and leaves it on
//! disconnect.
//!
//! # Architecture
//!
//! ```text
//! access-token ──▶ ProtocolHandler ──register──▶ ConnectionRegistry
//!                                                      │
//!                           whoami / client_id / filter ── lookup_user
//!                                                      │
//! disconnect ────▶ ProtocolHandler ──unregister──▶ ────┘
//! ```

use super::connection::ConnectionHandle;
use crate::core::{NotifyError, NotifyResult, UserContext};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A registered connection and the user it authenticated as
struct Registration {
    connection: ConnectionHandle,
    user: Arc<UserContext>,
}

/// Tracks all authenticated connections
///
/// Reads (lookups on every message) are frequent and writes
/// (authenticate/disconnect) are rare, hence the `RwLock`. The check-then-insert of
/// [`register`](Self::register) happens under the write lock, so concurrent
/// registrations of one ID store exactly one user.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<String, Registration>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated connection
    ///
    /// The first registration for an ID wins: returns `Ok(true)` if this call
    /// stored the entry and `Ok(false)` if the ID was already registered.
    pub async fn register(
        &self,
        connection: ConnectionHandle,
        user: Arc<UserContext>,
    ) -> NotifyResult<bool> {
        let connection_id = connection.id().to_string();
        if connection_id.is_empty() {
            return Err(NotifyError::InvalidArgument(
                "connection id must not be empty".to_string(),
            ));
        }

        let mut entries = self.entries.write().await;
        if entries.contains_key(&connection_id) {
            tracing::debug!(
                connection_id = %connection_id,
                "Connection already registered, keeping first registration"
            );
            return Ok(false);
        }

        tracing::debug!(
            connection_id = %connection_id,
            user = %user.account_id(),
            "Connection registered"
        );
        entries.insert(connection_id, Registration { connection, user });

        Ok(true)
    }

    /// Find the handle of a registered connection
    pub async fn lookup_connection(&self, connection_id: &str) -> Option<ConnectionHandle> {
        self.entries
            .read()
            .await
            .get(connection_id)
            .map(|entry| entry.connection.clone())
    }

    /// Find the user a connection authenticated as
    pub async fn lookup_user(&self, connection_id: &str) -> Option<Arc<UserContext>> {
        self.entries
            .read()
            .await
            .get(connection_id)
            .map(|entry| entry.user.clone())
    }

    /// Remove a connection and its user context
    ///
    /// Returns `Ok(true)` if something was removed. Unknown IDs are a no-op.
    pub async fn unregister(&self, connection_id: &str) -> NotifyResult<bool> {
        if connection_id.is_empty() {
            return Err(NotifyError::InvalidArgument(
                "connection id must not be empty".to_string(),
            ));
        }

        let removed = self.entries.write().await.remove(connection_id).is_some();
        if removed {
            tracing::debug!(connection_id = %connection_id, "Connection unregistered");
        }

        Ok(removed)
    }

    /// Get the number of registered connections (for monitoring)
    pub async fn connection_count(&self) -> usize {
        self.entries.read().await.len()
    }
}
