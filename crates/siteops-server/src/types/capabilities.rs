//! Initialization handshake types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ServerConfig;

/// Control-protocol revision advertised in the handshake.
pub const PROTOCOL_VERSION: &str = "2024-06-01";
pub const SERVER_NAME: &str = "siteops-server";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub client_info: Implementation,
    #[serde(default)]
    pub capabilities: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncOperationsCapability {
    pub timeout_secs: u64,
    pub retention_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    pub providers: Vec<String>,
    pub features: Vec<String>,
    pub async_operations: AsyncOperationsCapability,
    pub max_message_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: Implementation,
    pub capabilities: ServerCapabilities,
}

impl ServerCapabilities {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            providers: config.providers.clone(),
            features: config.features.clone(),
            async_operations: AsyncOperationsCapability {
                timeout_secs: config.operation_timeout.as_secs(),
                retention_secs: config.operation_retention.as_secs(),
            },
            max_message_bytes: config.max_message_bytes,
        }
    }
}

impl InitializeResult {
    pub fn for_config(config: &ServerConfig) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
            capabilities: ServerCapabilities::from_config(config),
        }
    }
}
