//! The handler contract every method implementation satisfies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use siteops_rpc::{JsonRpcRequest, ParamSchema, ProtocolError};

use crate::operations::{OperationId, OperationTracker, TrackerError};
use crate::session::{ConnectionContext, ConnectionId};

pub type HandlerResult<T = Value> = Result<T, HandlerError>;

/// A method implementation.
///
/// When [`Handler::schema`] returns a schema, params are validated against
/// it before `handle` runs; an invalid request never reaches the body.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    fn schema(&self) -> Option<&ParamSchema> {
        None
    }

    /// Params are `{}` when the request carried none.
    async fn handle(&self, params: Value, ctx: &RequestContext) -> HandlerResult;
}

/// Errors a handler may return.
///
/// `Protocol` errors reach the client with their code, message, and data
/// intact. Every other variant becomes `INTERNAL_ERROR` tagged with
/// [`HandlerError::kind`].
#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Protocol(_) => "protocol",
            HandlerError::Io(_) => "io",
            HandlerError::Serialization(_) => "serialization",
            HandlerError::Internal(_) => "internal",
        }
    }

    pub fn into_protocol_error(self) -> ProtocolError {
        match self {
            HandlerError::Protocol(e) => e,
            other => ProtocolError::internal(other.to_string(), other.kind()),
        }
    }
}

impl From<TrackerError> for HandlerError {
    fn from(err: TrackerError) -> Self {
        HandlerError::Protocol(err.into())
    }
}

/// Everything a handler can see about the request it is serving.
pub struct RequestContext {
    pub request: JsonRpcRequest,
    pub connection: Arc<ConnectionContext>,
    pub operations: Arc<OperationTracker>,
    close_after_reply: AtomicBool,
}

impl RequestContext {
    pub fn new(
        request: JsonRpcRequest,
        connection: Arc<ConnectionContext>,
        operations: Arc<OperationTracker>,
    ) -> Self {
        Self {
            request,
            connection,
            operations,
            close_after_reply: AtomicBool::new(false),
        }
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Track this request as an async operation owned by the connection.
    ///
    /// Fails with [`TrackerError::ConnectionClosed`] once the connection has
    /// begun closing.
    pub async fn start_operation(&self, params: Value) -> Result<OperationId, TrackerError> {
        self.operations
            .start(self.connection_id(), self.request.method.clone(), params)
            .await
    }

    pub async fn start_operation_with_timeout(
        &self,
        params: Value,
        timeout: Duration,
    ) -> Result<OperationId, TrackerError> {
        self.operations
            .start_with_timeout(self.connection_id(), self.request.method.clone(), params, timeout)
            .await
    }

    /// Close the connection once this request's reply has been queued.
    pub fn close_after_reply(&self) {
        self.close_after_reply.store(true, Ordering::Release);
    }

    pub fn close_requested(&self) -> bool {
        self.close_after_reply.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteops_rpc::error_codes::{INTERNAL_ERROR, INVALID_PARAMS};

    #[test]
    fn test_protocol_error_propagates_verbatim() {
        let err = HandlerError::from(ProtocolError::invalid_params("bad sku"));
        let mapped = err.into_protocol_error();
        assert_eq!(mapped.code(), INVALID_PARAMS);
        assert_eq!(mapped.to_string(), "Invalid params: bad sku");
    }

    #[test]
    fn test_other_errors_tagged_with_kind() {
        let io = HandlerError::from(std::io::Error::other("disk full")).into_protocol_error();
        assert_eq!(io.code(), INTERNAL_ERROR);
        assert_eq!(io.data().unwrap()["kind"], "io");

        let serde = serde_json::from_str::<Value>("{").unwrap_err();
        let mapped = HandlerError::from(serde).into_protocol_error();
        assert_eq!(mapped.data().unwrap()["kind"], "serialization");

        let internal = HandlerError::from(anyhow::anyhow!("cache poisoned")).into_protocol_error();
        assert_eq!(internal.data().unwrap()["kind"], "internal");
        assert!(internal.to_string().contains("cache poisoned"));
    }

    #[test]
    fn test_tracker_error_becomes_async_operation_error() {
        let err = HandlerError::from(TrackerError::NotFound(OperationId::new()));
        assert_eq!(
            err.into_protocol_error().code(),
            siteops_rpc::app_error_codes::ASYNC_OPERATION_ERROR
        );
    }
}
