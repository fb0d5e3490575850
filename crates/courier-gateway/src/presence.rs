use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use courier_types::events::GatewayEvent;

/// Opaque reference to a live client session: a connection id plus the queue
/// draining into that session's WebSocket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                conn_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue an event for this session. `false` means the session's receive
    /// loop is gone; callers treat that as "recipient offline".
    pub fn push(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Process-wide map from user to at most one live session.
///
/// The forward map and the reverse (connection -> user) index are mutated
/// under a single lock, so a disconnect arriving for a superseded connection
/// can never evict the session that replaced it. Registering over an existing
/// entry replaces it (last connect wins); the superseded session is left to
/// die on its own transport.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    by_user: HashMap<Uuid, ConnectionHandle>,
    by_conn: HashMap<Uuid, Uuid>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user_id: Uuid, handle: ConnectionHandle) {
        let mut inner = self.inner.write().await;
        inner.by_conn.insert(handle.conn_id(), user_id);
        if let Some(replaced) = inner.by_user.insert(user_id, handle) {
            inner.by_conn.remove(&replaced.conn_id());
        }
    }

    /// Remove the entry owned by `conn_id`; a no-op when the connection was
    /// already superseded or never registered. Returns the user that went
    /// offline, if any.
    pub async fn unregister_by_handle(&self, conn_id: Uuid) -> Option<Uuid> {
        let mut inner = self.inner.write().await;
        // A reverse entry exists only while the forward entry still points
        // at the same connection, so removing both is safe.
        let user_id = inner.by_conn.remove(&conn_id)?;
        inner.by_user.remove(&user_id);
        Some(user_id)
    }

    pub async fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.inner.read().await.by_user.get(&user_id).cloned()
    }

    pub async fn is_live(&self, user_id: Uuid) -> bool {
        self.inner.read().await.by_user.contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_lookup_then_unregister() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (handle, _rx) = ConnectionHandle::new();

        registry.register(user, handle.clone()).await;
        assert!(registry.is_live(user).await);
        assert_eq!(
            registry.lookup(user).await.map(|h| h.conn_id()),
            Some(handle.conn_id())
        );

        assert_eq!(registry.unregister_by_handle(handle.conn_id()).await, Some(user));
        assert!(!registry.is_live(user).await);
        assert!(registry.lookup(user).await.is_none());
    }

    #[tokio::test]
    async fn last_connect_wins() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let (first, _rx1) = ConnectionHandle::new();
        let (second, _rx2) = ConnectionHandle::new();

        registry.register(user, first.clone()).await;
        registry.register(user, second.clone()).await;
        assert_eq!(
            registry.lookup(user).await.map(|h| h.conn_id()),
            Some(second.conn_id())
        );

        // The superseded connection's disconnect must not evict the new one.
        assert_eq!(registry.unregister_by_handle(first.conn_id()).await, None);
        assert!(registry.is_live(user).await);

        assert_eq!(registry.unregister_by_handle(second.conn_id()).await, Some(user));
        assert!(!registry.is_live(user).await);
    }

    #[tokio::test]
    async fn unregister_unknown_handle_is_noop() {
        let registry = PresenceRegistry::new();
        assert_eq!(registry.unregister_by_handle(Uuid::new_v4()).await, None);
    }
}
