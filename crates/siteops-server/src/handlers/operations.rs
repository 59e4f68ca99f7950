//! Methods `operations/status` and `operations/list`: late queries against
//! the calling connection's async operations.

use async_trait::async_trait;
use serde_json::{json, Value};

use siteops_rpc::{ParamSchema, PropertySchema, ProtocolError, SchemaType};

use crate::operations::{OperationId, TrackerError};
use crate::protocol::{Handler, HandlerResult, RequestContext};

pub struct OperationStatusHandler {
    schema: ParamSchema,
}

impl OperationStatusHandler {
    pub fn new() -> Self {
        Self {
            schema: ParamSchema::new().require("operationId").property(
                "operationId",
                PropertySchema::of(SchemaType::String).describe("Id returned when the operation started"),
            ),
        }
    }
}

impl Default for OperationStatusHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for OperationStatusHandler {
    fn schema(&self) -> Option<&ParamSchema> {
        Some(&self.schema)
    }

    async fn handle(&self, params: Value, ctx: &RequestContext) -> HandlerResult {
        let raw = params["operationId"].as_str().unwrap_or_default();
        let id: OperationId = raw.parse().map_err(|_| ProtocolError::InvalidParams {
            message: format!("Malformed operation id: {raw}"),
            data: Some(json!({ "parameter": "operationId" })),
        })?;

        // Operations of other connections are reported as unknown.
        let record = ctx
            .operations
            .get(id)
            .await
            .filter(|r| r.connection_id == ctx.connection_id())
            .ok_or(TrackerError::NotFound(id))?;

        Ok(serde_json::to_value(record)?)
    }
}

pub struct OperationListHandler;

#[async_trait]
impl Handler for OperationListHandler {
    async fn handle(&self, _params: Value, ctx: &RequestContext) -> HandlerResult {
        let records = ctx.operations.list_for_connection(ctx.connection_id()).await;
        Ok(json!({ "operations": serde_json::to_value(records)? }))
    }
}
