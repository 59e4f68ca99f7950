//! TCP listener: one connection per accepted socket.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::session::ConnectionManager;

pub struct TcpTransport {
    manager: Arc<ConnectionManager>,
    shutdown: CancellationToken,
}

impl TcpTransport {
    pub fn new(manager: Arc<ConnectionManager>, shutdown: CancellationToken) -> Self {
        Self { manager, shutdown }
    }

    /// Bind `addr` and accept until shutdown.
    pub async fn run(&self, addr: SocketAddr) -> ServerResult<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.run_on(listener).await
    }

    /// Accept on an already-bound listener until shutdown.
    pub async fn run_on(&self, listener: TcpListener) -> ServerResult<()> {
        info!("SiteOps server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        Err(e) => error!("accept error: {e}"),
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let Some(permit) = self.manager.try_reserve() else {
            warn!(%peer, "Connection limit reached, refusing connection");
            drop(stream);
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(%peer, "Failed to set TCP_NODELAY: {e}");
        }

        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            manager
                .serve_reserved(reader, writer, Some(peer.to_string()), permit)
                .await;
        });
    }
}
