//! Method `disconnect`: acknowledge, then close the connection.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::protocol::{Handler, HandlerResult, RequestContext};

pub struct DisconnectHandler;

#[async_trait]
impl Handler for DisconnectHandler {
    async fn handle(&self, _params: Value, ctx: &RequestContext) -> HandlerResult {
        tracing::info!(connection_id = %ctx.connection_id(), "Disconnect requested");
        ctx.close_after_reply();
        Ok(json!({ "status": "closing" }))
    }
}
