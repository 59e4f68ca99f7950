//! Server-level errors (startup, transport, limits).

use std::net::SocketAddr;

use crate::config::ConfigError;
use crate::protocol::RegistryError;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Handler registration failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection limit of {max} reached")]
    ConnectionLimit { max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
