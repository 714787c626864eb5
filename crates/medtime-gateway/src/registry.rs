use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use medtime_types::events::GatewayEvent;

/// Tracks the live gateway connection of each user.
///
/// A user holds at most one connection; a reconnect replaces the previous
/// sender, and the stale connection's cleanup is ignored via `conn_id`.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// user_id -> (conn_id, sender)
    channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user_id`. Returns (conn_id, receiver).
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.channels.write().await.insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Remove the user's connection, but only if `conn_id` still owns it.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.channels.write().await;
        if channels.get(&user_id).is_some_and(|(cid, _)| *cid == conn_id) {
            channels.remove(&user_id);
        }
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.inner
            .channels
            .read()
            .await
            .get(&user_id)
            .is_some_and(|(_, tx)| !tx.is_closed())
    }

    /// Push an event to the user's live connection.
    /// Returns false when the user has no open connection.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        let channels = self.inner.channels.read().await;
        match channels.get(&user_id) {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn connected_count(&self) -> usize {
        self.inner.channels.read().await.len()
    }
}
