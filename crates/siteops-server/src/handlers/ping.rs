//! Method `ping`: liveness check.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::protocol::{Handler, HandlerResult, RequestContext};

pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    async fn handle(&self, _params: Value, _ctx: &RequestContext) -> HandlerResult {
        Ok(json!({ "message": "pong" }))
    }
}
