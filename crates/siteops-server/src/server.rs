//! Server assembly: handler registration, shared state, transports.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::events::{EventBus, ServerEvent};
use crate::handlers;
use crate::operations::{NotificationSink, OperationTracker};
use crate::protocol::{Dispatcher, Handler, HandlerRegistry, RegistryError};
use crate::session::{CloseReason, ConnectionManager, ConnectionRegistry};
use crate::transport::TcpTransport;
use crate::types::InitializeResult;

/// How long shutdown waits for open connections to finish closing.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Collects handlers before the server starts. Built-in methods are
/// pre-registered; unregister one to replace it.
pub struct ServerBuilder {
    config: ServerConfig,
    handlers: HandlerRegistry,
    events: EventBus,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        let registry = HandlerRegistry::with_builtins(handlers::builtin(&config));
        Self {
            config,
            handlers: registry,
            events: EventBus::default(),
        }
    }

    pub fn register<H: Handler>(
        mut self,
        method: impl Into<String>,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.handlers.register(method, handler)?;
        Ok(self)
    }

    pub fn register_shared(
        mut self,
        method: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, RegistryError> {
        self.handlers.register_shared(method, handler)?;
        Ok(self)
    }

    pub fn unregister(mut self, method: &str) -> Self {
        self.handlers.unregister(method);
        self
    }

    /// Publish events on an existing bus instead of a fresh one.
    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Validate the configuration and freeze the registry.
    pub fn build(self) -> ServerResult<Server> {
        self.config.validate()?;

        let config = Arc::new(self.config);
        let shutdown = CancellationToken::new();
        let connections = Arc::new(ConnectionRegistry::new());
        let sink: Arc<dyn NotificationSink> = connections.clone();
        let operations = OperationTracker::new(
            sink,
            self.events.clone(),
            config.operation_timeout,
            config.operation_retention,
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(self.handlers),
            Arc::clone(&operations),
            self.events.clone(),
            config.request_timeout,
        ));
        let manager = Arc::new(ConnectionManager::new(
            dispatcher,
            connections,
            operations,
            self.events.clone(),
            config.max_connections,
            config.max_message_bytes,
            shutdown.clone(),
        ));

        Ok(Server {
            config,
            manager,
            events: self.events,
            shutdown,
        })
    }
}

/// A configured server, ready to serve on any transport.
pub struct Server {
    config: Arc<ServerConfig>,
    manager: Arc<ConnectionManager>,
    events: EventBus,
    shutdown: CancellationToken,
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn operations(&self) -> &Arc<OperationTracker> {
        self.manager.operations()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        self.manager.dispatcher().handlers().methods()
    }

    /// What `initialize` answers with.
    pub fn initialize_result(&self) -> InitializeResult {
        InitializeResult::for_config(&self.config)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve a single already-established duplex stream.
    pub async fn serve_connection<R, W>(
        &self,
        reader: R,
        writer: W,
        peer: Option<String>,
    ) -> ServerResult<CloseReason>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.manager.serve(reader, writer, peer).await
    }

    /// Listen on the configured address until shutdown.
    pub async fn serve_tcp(&self) -> ServerResult<()> {
        let transport = TcpTransport::new(Arc::clone(&self.manager), self.shutdown.clone());
        transport.run(self.config.bind).await?;
        self.finish().await;
        Ok(())
    }

    pub async fn serve_listener(&self, listener: TcpListener) -> ServerResult<()> {
        let transport = TcpTransport::new(Arc::clone(&self.manager), self.shutdown.clone());
        transport.run_on(listener).await?;
        self.finish().await;
        Ok(())
    }

    #[cfg(feature = "stdio")]
    pub async fn serve_stdio(&self) -> ServerResult<CloseReason> {
        crate::transport::StdioTransport::new(Arc::clone(&self.manager))
            .run()
            .await
    }

    /// Stop accepting and close every live connection.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }

    async fn finish(&self) {
        self.manager.shutdown().await;
        if self.manager.drain(SHUTDOWN_GRACE).await {
            tracing::info!("server stopped");
        }
    }
}
