//! Request dispatcher: validates an envelope, routes it to its handler, and
//! maps whatever comes back to a wire response.
//!
//! This is the only place handler failures are translated into JSON-RPC
//! errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use siteops_rpc::{
    validate_envelope, JsonRpcMessage, JsonRpcResponse, ProtocolError, ProtocolResult, RequestId,
};

use crate::events::{elapsed_ms, EventBus, ServerEvent};
use crate::handlers::INITIALIZE;
use crate::operations::OperationTracker;
use crate::session::ConnectionContext;

use super::handler::RequestContext;
use super::registry::HandlerRegistry;

/// What the connection should do with one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// Present only when the request carried an id.
    pub response: Option<JsonRpcMessage>,
    /// Close the connection after `response` is queued.
    pub close_connection: bool,
}

impl DispatchOutcome {
    fn reply(id: Option<RequestId>, result: ProtocolResult<Value>) -> Self {
        let response = id.map(|id| match result {
            Ok(value) => JsonRpcResponse::new(id, value).into(),
            Err(e) => e.to_json_rpc_error(id).into(),
        });
        Self {
            response,
            close_connection: false,
        }
    }
}

pub struct Dispatcher {
    handlers: Arc<HandlerRegistry>,
    operations: Arc<OperationTracker>,
    events: EventBus,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        operations: Arc<OperationTracker>,
        events: EventBus,
        request_timeout: Duration,
    ) -> Self {
        Self {
            handlers,
            operations,
            events,
            request_timeout,
        }
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub async fn handle_message(
        &self,
        message: Value,
        connection: &Arc<ConnectionContext>,
    ) -> DispatchOutcome {
        let request = match validate_envelope(message) {
            Ok(request) => request,
            Err(rejection) => {
                tracing::warn!(
                    connection_id = %connection.id(),
                    error = %rejection.error,
                    "Rejected envelope"
                );
                return DispatchOutcome::reply(rejection.id, Err(rejection.error));
            }
        };

        connection.record_request();
        let started = Instant::now();
        let id = request.id.clone();
        let method = request.method.clone();
        tracing::debug!(connection_id = %connection.id(), %method, ?id, "Dispatching");

        let ctx = Arc::new(RequestContext::new(
            request,
            Arc::clone(connection),
            Arc::clone(&self.operations),
        ));
        let result = self.dispatch(Arc::clone(&ctx)).await;

        if let Err(e) = &result {
            tracing::debug!(%method, code = e.code(), error = %e, "Request failed");
        }
        self.events.emit(ServerEvent::MessageProcessed {
            connection_id: connection.id(),
            method,
            success: result.is_ok(),
            elapsed_ms: elapsed_ms(started.elapsed()),
        });

        let mut outcome = DispatchOutcome::reply(id, result);
        outcome.close_connection = ctx.close_requested();
        outcome
    }

    async fn dispatch(&self, ctx: Arc<RequestContext>) -> ProtocolResult<Value> {
        let method = ctx.request.method.as_str();

        if method != INITIALIZE && !ctx.connection.is_initialized() {
            return Err(ProtocolError::InvalidRequest(format!(
                "Connection not initialized; call {INITIALIZE} before {method}"
            )));
        }

        let handler = self
            .handlers
            .get(method)
            .ok_or_else(|| ProtocolError::MethodNotFound(method.to_string()))?;

        if let Some(schema) = handler.schema() {
            schema.validate(ctx.request.params.as_ref())?;
        }

        let params = ctx
            .request
            .params
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let task_ctx = Arc::clone(&ctx);
        let mut task = tokio::spawn(async move { handler.handle(params, &task_ctx).await });

        // A handler never outlives its connection.
        let joined = tokio::select! {
            joined = tokio::time::timeout(self.request_timeout, &mut task) => joined,
            _ = ctx.connection.closed() => {
                task.abort();
                tracing::debug!(%method, "Connection closed, handler aborted");
                return Err(ProtocolError::internal(
                    "Connection closed before the handler finished",
                    "cancelled",
                ));
            }
        };

        match joined {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(e.into_protocol_error()),
            Ok(Err(join)) if join.is_panic() => {
                tracing::error!(%method, "Handler panicked");
                Err(ProtocolError::internal("Handler panicked", "panic"))
            }
            Ok(Err(_)) => Err(ProtocolError::internal("Handler was cancelled", "cancelled")),
            Err(_) => {
                task.abort();
                tracing::warn!(%method, timeout = ?self.request_timeout, "Handler timed out");
                Err(ProtocolError::internal(
                    format!("Handler exceeded the {:?} request timeout", self.request_timeout),
                    "timeout",
                ))
            }
        }
    }
}
