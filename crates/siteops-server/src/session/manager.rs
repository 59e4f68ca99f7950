//! Connection lifecycle and the per-connection message pipeline.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use siteops_rpc::{CodecError, JsonRpcMessage, MessageCodec, ProtocolError, RequestId};

use crate::error::{ServerError, ServerResult};
use crate::events::{EventBus, ServerEvent};
use crate::handlers::{DISCONNECT, INITIALIZE};
use crate::operations::OperationTracker;
use crate::protocol::Dispatcher;

use super::connection::{CloseReason, ConnectionContext, ConnectionState};
use super::registry::ConnectionRegistry;

/// Accepts connections and runs one pipeline task per connection.
pub struct ConnectionManager {
    dispatcher: Arc<Dispatcher>,
    connections: Arc<ConnectionRegistry>,
    operations: Arc<OperationTracker>,
    events: EventBus,
    slots: Arc<Semaphore>,
    max_connections: usize,
    max_message_bytes: usize,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        connections: Arc<ConnectionRegistry>,
        operations: Arc<OperationTracker>,
        events: EventBus,
        max_connections: usize,
        max_message_bytes: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            connections,
            operations,
            events,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            max_message_bytes,
            shutdown,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn operations(&self) -> &Arc<OperationTracker> {
        &self.operations
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Connections currently holding a slot.
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.slots.available_permits()
    }

    /// Claim a connection slot, if one is free.
    pub fn try_reserve(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).try_acquire_owned().ok()
    }

    /// Serve one connection to completion, claiming a slot first.
    pub async fn serve<R, W>(
        &self,
        reader: R,
        writer: W,
        peer: Option<String>,
    ) -> ServerResult<CloseReason>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let permit = self.try_reserve().ok_or(ServerError::ConnectionLimit {
            max: self.max_connections,
        })?;
        Ok(self.serve_reserved(reader, writer, peer, permit).await)
    }

    /// Serve one connection on an already-claimed slot.
    pub async fn serve_reserved<R, W>(
        &self,
        reader: R,
        writer: W,
        peer: Option<String>,
        _permit: OwnedSemaphorePermit,
    ) -> CloseReason
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (connection, mut outbound) = ConnectionContext::new(peer);
        let id = connection.id();
        self.connections.insert(Arc::clone(&connection)).await;
        connection.advance(ConnectionState::Active);

        info!(connection_id = %id, peer = ?connection.peer(), "Connection opened");
        self.events.emit(ServerEvent::ConnectionOpened {
            connection_id: id,
            peer: connection.peer().map(str::to_string),
        });

        let mut frames = FramedRead::new(
            reader,
            MessageCodec::with_max_message_bytes(self.max_message_bytes),
        );
        let mut sink = FramedWrite::new(writer, MessageCodec::new());

        loop {
            tokio::select! {
                biased;

                _ = connection.closed() => break,

                _ = self.shutdown.cancelled() => {
                    connection.close(CloseReason::ServerShutdown);
                    break;
                }

                Some(message) = outbound.recv() => {
                    if let Err(e) = sink.send(message).await {
                        error!(connection_id = %id, "Write failed: {e}");
                        connection.close(CloseReason::TransportError);
                        break;
                    }
                }

                frame = frames.next() => match frame {
                    Some(Ok(message)) => self.process(message, &connection).await,
                    Some(Err(CodecError::BufferOverflow { size, max })) => {
                        warn!(connection_id = %id, size, max, "Inbound buffer overflow, closing");
                        let error = ProtocolError::InternalError {
                            message: format!("Message exceeds {max} bytes without a delimiter"),
                            data: Some(json!({ "kind": "buffer_overflow", "limit": max })),
                        };
                        connection.close(CloseReason::BufferOverflow);
                        if let Err(e) = sink.send(error.to_json_rpc_error(RequestId::Null)).await {
                            debug!(connection_id = %id, "Could not report overflow: {e}");
                        }
                        break;
                    }
                    Some(Err(e)) => {
                        error!(connection_id = %id, "Read failed: {e}");
                        connection.close(CloseReason::TransportError);
                        break;
                    }
                    None => {
                        connection.close(CloseReason::PeerClosed);
                        break;
                    }
                },
            }
        }

        // Flush what was queued before the close, then shut the writer down.
        while let Ok(message) = outbound.try_recv() {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        if let Err(e) = SinkExt::<JsonRpcMessage>::close(&mut sink).await {
            debug!(connection_id = %id, "Writer shutdown failed: {e}");
        }

        self.connections.remove(id).await;
        let cancelled_operations = self.operations.cancel_connection(id).await;
        connection.advance(ConnectionState::Closed);

        let reason = connection.close_reason().unwrap_or(CloseReason::PeerClosed);
        let dropped = frames.decoder().dropped_segments();
        info!(
            connection_id = %id,
            %reason,
            requests = connection.requests(),
            dropped_segments = dropped,
            cancelled_operations,
            "Connection closed"
        );
        self.events.emit(ServerEvent::ConnectionClosed {
            connection_id: id,
            reason,
            requests: connection.requests(),
            cancelled_operations,
        });
        reason
    }

    /// Dispatch one framed message. `initialize` and `disconnect` run inline
    /// so they take effect before the next frame is read; everything else
    /// runs in its own task and is answered in completion order.
    async fn process(&self, message: Value, connection: &Arc<ConnectionContext>) {
        let inline = matches!(
            message.get("method").and_then(Value::as_str),
            Some(INITIALIZE | DISCONNECT)
        );
        let dispatcher = Arc::clone(&self.dispatcher);
        let connection = Arc::clone(connection);

        let task = async move {
            let outcome = dispatcher.handle_message(message, &connection).await;
            if let Some(response) = outcome.response {
                connection.send(response);
            }
            if outcome.close_connection {
                connection.close(CloseReason::Requested);
            }
        };

        if inline {
            task.await;
        } else {
            tokio::spawn(task);
        }
    }

    /// Ask every live connection to close.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let closing = self.connections.close_all(CloseReason::ServerShutdown).await;
        if closing > 0 {
            info!(connections = closing, "Closing live connections");
        }
    }

    /// Wait until every connection slot is released, up to `grace`.
    pub async fn drain(&self, grace: Duration) -> bool {
        let all = u32::try_from(self.max_connections).unwrap_or(u32::MAX);
        match tokio::time::timeout(grace, self.slots.acquire_many(all)).await {
            Ok(Ok(_permits)) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(
                    remaining = self.active_connections(),
                    "Connections still open after shutdown grace period"
                );
                false
            }
        }
    }
}
