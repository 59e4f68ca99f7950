//! Live connection set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use siteops_rpc::JsonRpcNotification;

use crate::operations::NotificationSink;

use super::connection::{CloseReason, ConnectionContext, ConnectionId};

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<ConnectionContext>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, connection: Arc<ConnectionContext>) {
        self.connections
            .lock()
            .await
            .insert(connection.id(), connection);
    }

    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionContext>> {
        self.connections.lock().await.remove(&id)
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionContext>> {
        self.connections.lock().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.connections.lock().await.keys().copied().collect()
    }

    /// Ask every live connection to close.
    pub async fn close_all(&self, reason: CloseReason) -> usize {
        let live: Vec<Arc<ConnectionContext>> =
            self.connections.lock().await.values().cloned().collect();
        for connection in &live {
            connection.close(reason);
        }
        live.len()
    }
}

#[async_trait]
impl NotificationSink for ConnectionRegistry {
    async fn notify(&self, connection_id: ConnectionId, notification: JsonRpcNotification) -> bool {
        match self.get(connection_id).await {
            Some(connection) => connection.send(notification),
            None => false,
        }
    }

    async fn is_open(&self, connection_id: ConnectionId) -> bool {
        self.get(connection_id)
            .await
            .is_some_and(|connection| !connection.is_closing())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionState;

    #[tokio::test]
    async fn test_notify_unknown_connection_is_dropped() {
        let registry = ConnectionRegistry::new();
        let delivered = registry
            .notify(ConnectionId::new(), JsonRpcNotification::new("progress", None))
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_notify_routes_to_live_connection() {
        let registry = ConnectionRegistry::new();
        let (ctx, mut rx) = ConnectionContext::new(None);
        ctx.advance(ConnectionState::Active);
        registry.insert(ctx.clone()).await;

        assert!(
            registry
                .notify(ctx.id(), JsonRpcNotification::new("progress", None))
                .await
        );
        assert!(rx.try_recv().is_ok());

        registry.remove(ctx.id()).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_is_open_tracks_close_and_removal() {
        let registry = ConnectionRegistry::new();
        let (ctx, _rx) = ConnectionContext::new(None);
        ctx.advance(ConnectionState::Active);
        assert!(!registry.is_open(ctx.id()).await);

        registry.insert(ctx.clone()).await;
        assert!(registry.is_open(ctx.id()).await);

        ctx.close(CloseReason::Requested);
        assert!(!registry.is_open(ctx.id()).await);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = ConnectionContext::new(None);
        let (b, _rb) = ConnectionContext::new(None);
        registry.insert(a.clone()).await;
        registry.insert(b.clone()).await;

        assert_eq!(registry.close_all(CloseReason::ServerShutdown).await, 2);
        assert_eq!(a.close_reason(), Some(CloseReason::ServerShutdown));
        assert!(b.is_closing());
    }
}
