//! Connection lifecycle, the live connection set, and the per-connection
//! read → frame → validate → dispatch → respond pipeline.

pub mod connection;
pub mod manager;
pub mod registry;

pub use connection::{ClientSession, CloseReason, ConnectionContext, ConnectionId, ConnectionState};
pub use manager::ConnectionManager;
pub use registry::ConnectionRegistry;
