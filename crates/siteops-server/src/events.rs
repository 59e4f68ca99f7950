//! Server event bus.
//!
//! A `tokio::sync::broadcast` channel carrying [`ServerEvent`] values for
//! observers (metrics exporters, audit logs, tests). With no subscribers
//! events are dropped; nothing in the server waits on a consumer.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::operations::{OperationId, OperationStatus};
use crate::session::{CloseReason, ConnectionId};

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    ConnectionOpened {
        connection_id: ConnectionId,
        peer: Option<String>,
    },
    ConnectionClosed {
        connection_id: ConnectionId,
        reason: CloseReason,
        requests: u64,
        cancelled_operations: usize,
    },
    /// Emitted once per dispatched request or notification.
    MessageProcessed {
        connection_id: ConnectionId,
        method: String,
        success: bool,
        elapsed_ms: u64,
    },
    OperationStarted {
        operation_id: OperationId,
        connection_id: ConnectionId,
        method: String,
    },
    OperationFinished {
        operation_id: OperationId,
        connection_id: ConnectionId,
        status: OperationStatus,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

pub(crate) fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::default();
        bus.emit(ServerEvent::ConnectionOpened {
            connection_id: ConnectionId::new(),
            peer: None,
        });
    }

    #[test]
    fn test_subscribe_receive() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let connection_id = ConnectionId::new();
        bus.emit(ServerEvent::MessageProcessed {
            connection_id,
            method: "ping".to_string(),
            success: true,
            elapsed_ms: 0,
        });

        match rx.try_recv().unwrap() {
            ServerEvent::MessageProcessed { method, success, .. } => {
                assert_eq!(method, "ping");
                assert!(success);
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ServerEvent::ConnectionClosed {
            connection_id: ConnectionId::new(),
            reason: CloseReason::BufferOverflow,
            requests: 3,
            cancelled_operations: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ConnectionClosed");
        assert_eq!(json["reason"], "buffer_overflow");
    }
}
