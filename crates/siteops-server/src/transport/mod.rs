//! Byte-stream transports feeding the connection manager.

#[cfg(feature = "stdio")]
pub mod stdio;
pub mod tcp;

#[cfg(feature = "stdio")]
pub use stdio::StdioTransport;
pub use tcp::TcpTransport;
