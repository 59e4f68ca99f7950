//! SiteOps control server: JSON-RPC 2.0 sessions over a persistent duplex
//! stream, pluggable method handlers, and async operation tracking.

pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod operations;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;

pub use siteops_rpc as rpc;

pub use config::{ConfigError, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use events::{EventBus, ServerEvent};
pub use operations::{
    OperationId, OperationRecord, OperationStatus, OperationTracker, OperationUpdate,
    TrackerError, UpdateStatus,
};
pub use protocol::{Handler, HandlerError, HandlerRegistry, HandlerResult, RegistryError, RequestContext};
pub use server::{Server, ServerBuilder};
pub use session::{CloseReason, ConnectionId, ConnectionState};
