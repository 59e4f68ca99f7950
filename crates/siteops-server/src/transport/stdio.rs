//! Stdio transport: a single connection over stdin/stdout.
//!
//! Logs must go to stderr while this transport runs.

use std::sync::Arc;

use crate::error::ServerResult;
use crate::session::{CloseReason, ConnectionManager};

pub struct StdioTransport {
    manager: Arc<ConnectionManager>,
}

impl StdioTransport {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Serve stdin/stdout until EOF, `disconnect`, or shutdown.
    pub async fn run(&self) -> ServerResult<CloseReason> {
        tracing::info!("Stdio transport started");
        let reason = self
            .manager
            .serve(tokio::io::stdin(), tokio::io::stdout(), Some("stdio".to_string()))
            .await?;
        tracing::info!(%reason, "Stdio transport stopped");
        Ok(reason)
    }
}
