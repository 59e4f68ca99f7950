//! Built-in control methods, registered on every server.

pub mod disconnect;
pub mod initialize;
pub mod operations;
pub mod ping;

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::protocol::Handler;

pub use disconnect::DisconnectHandler;
pub use initialize::InitializeHandler;
pub use operations::{OperationListHandler, OperationStatusHandler};
pub use ping::PingHandler;

pub const INITIALIZE: &str = "initialize";
pub const PING: &str = "ping";
pub const DISCONNECT: &str = "disconnect";
pub const OPERATIONS_STATUS: &str = "operations/status";
pub const OPERATIONS_LIST: &str = "operations/list";

/// The built-in handlers keyed by method name.
pub fn builtin(config: &ServerConfig) -> Vec<(&'static str, Arc<dyn Handler>)> {
    let initialize: Arc<dyn Handler> = Arc::new(InitializeHandler::new(config));
    let ping: Arc<dyn Handler> = Arc::new(PingHandler);
    let disconnect: Arc<dyn Handler> = Arc::new(DisconnectHandler);
    let status: Arc<dyn Handler> = Arc::new(OperationStatusHandler::new());
    let list: Arc<dyn Handler> = Arc::new(OperationListHandler);

    vec![
        (INITIALIZE, initialize),
        (PING, ping),
        (DISCONNECT, disconnect),
        (OPERATIONS_STATUS, status),
        (OPERATIONS_LIST, list),
    ]
}
