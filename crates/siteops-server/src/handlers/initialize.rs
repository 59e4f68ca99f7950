//! Method `initialize`: capability handshake.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use siteops_rpc::{ParamSchema, PropertySchema, ProtocolError, SchemaType};

use crate::config::ServerConfig;
use crate::protocol::{Handler, HandlerResult, RequestContext};
use crate::session::ClientSession;
use crate::types::{InitializeParams, InitializeResult, PROTOCOL_VERSION};

pub struct InitializeHandler {
    schema: ParamSchema,
    result: InitializeResult,
}

impl InitializeHandler {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            schema: ParamSchema::new()
                .require("clientInfo")
                .property("clientInfo", PropertySchema::of(SchemaType::Object))
                .property("capabilities", PropertySchema::of(SchemaType::Object))
                .property("protocolVersion", PropertySchema::of(SchemaType::String)),
            result: InitializeResult::for_config(config),
        }
    }
}

#[async_trait]
impl Handler for InitializeHandler {
    fn schema(&self) -> Option<&ParamSchema> {
        Some(&self.schema)
    }

    async fn handle(&self, params: Value, ctx: &RequestContext) -> HandlerResult {
        let params: InitializeParams = serde_json::from_value(params).map_err(|e| {
            ProtocolError::invalid_params(format!("Malformed initialize params: {e}"))
        })?;

        if let Some(requested) = &params.protocol_version {
            if requested != PROTOCOL_VERSION {
                tracing::warn!(
                    "Client requested protocol version {requested}, server speaks {PROTOCOL_VERSION}. Proceeding with server version."
                );
            }
        }

        tracing::info!(
            connection_id = %ctx.connection_id(),
            "Initialized with client: {} v{}",
            params.client_info.name,
            params.client_info.version
        );

        let replaced = ctx
            .connection
            .mark_initialized(ClientSession {
                client_info: params.client_info,
                capabilities: params.capabilities,
                protocol_version: params.protocol_version,
                initialized_at: Utc::now(),
            })
            .await;
        if replaced {
            tracing::info!(connection_id = %ctx.connection_id(), "Connection re-initialized");
        }

        Ok(serde_json::to_value(&self.result)?)
    }
}
