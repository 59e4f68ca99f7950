//! Per-connection context and lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use siteops_rpc::JsonRpcMessage;

use crate::types::Implementation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// `Connecting → Active → Closing → Closed`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Transport EOF.
    PeerClosed,
    /// The client sent `disconnect`.
    Requested,
    BufferOverflow,
    TransportError,
    ServerShutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::Requested => "requested",
            CloseReason::BufferOverflow => "buffer_overflow",
            CloseReason::TransportError => "transport_error",
            CloseReason::ServerShutdown => "server_shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the client told us during `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSession {
    pub client_info: Implementation,
    pub capabilities: Map<String, Value>,
    pub protocol_version: Option<String>,
    pub initialized_at: DateTime<Utc>,
}

/// State shared by the connection task, in-flight handlers, and the
/// operation tracker's push path.
pub struct ConnectionContext {
    id: ConnectionId,
    created_at: DateTime<Utc>,
    peer: Option<String>,
    state: watch::Sender<ConnectionState>,
    initialized: AtomicBool,
    session: RwLock<Option<ClientSession>>,
    requests: AtomicU64,
    outbound: mpsc::UnboundedSender<JsonRpcMessage>,
    close: CancellationToken,
    close_reason: OnceLock<CloseReason>,
}

impl ConnectionContext {
    /// Create a context in `Connecting` along with its outbound queue.
    pub fn new(
        peer: Option<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<JsonRpcMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let context = Arc::new(Self {
            id: ConnectionId::new(),
            created_at: Utc::now(),
            peer,
            state,
            initialized: AtomicBool::new(false),
            session: RwLock::new(None),
            requests: AtomicU64::new(0),
            outbound,
            close: CancellationToken::new(),
            close_reason: OnceLock::new(),
        });
        (context, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Move forward to `next`. Backward transitions are ignored.
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Store the negotiated session and flip the initialized flag.
    ///
    /// Returns `true` when this replaced an earlier session.
    pub async fn mark_initialized(&self, session: ClientSession) -> bool {
        let mut slot = self.session.write().await;
        let replaced = slot.replace(session).is_some();
        self.initialized.store(true, Ordering::Release);
        replaced
    }

    pub async fn client_session(&self) -> Option<ClientSession> {
        self.session.read().await.clone()
    }

    /// Count one processed request; returns the new total.
    pub fn record_request(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Queue a message for the writer. A no-op unless the connection is
    /// `Active`.
    pub fn send(&self, message: impl Into<JsonRpcMessage>) -> bool {
        if self.state() != ConnectionState::Active {
            return false;
        }
        self.outbound.send(message.into()).is_ok()
    }

    /// Begin closing. The first reason recorded wins.
    pub fn close(&self, reason: CloseReason) {
        if self.close_reason.set(reason).is_ok() {
            tracing::debug!(connection_id = %self.id, %reason, "Closing connection");
        }
        self.advance(ConnectionState::Closing);
        self.close.cancel();
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    pub fn is_closing(&self) -> bool {
        self.close.is_cancelled()
    }

    pub(crate) fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close.cancelled()
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("initialized", &self.is_initialized())
            .field("requests", &self.requests())
            .finish()
    }
}
