//! Error types and JSON-RPC error codes.

use serde_json::{json, Value};

use crate::message::{JsonRpcError, JsonRpcErrorObject, RequestId};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Application error codes, all inside the reserved server range.
pub mod app_error_codes {
    use std::ops::RangeInclusive;

    pub const AUTHENTICATION_ERROR: i32 = -32001;
    pub const AUTHORIZATION_ERROR: i32 = -32002;
    pub const RATE_LIMIT_EXCEEDED: i32 = -32003;
    /// An upstream hosting/e-commerce provider failed.
    pub const PROVIDER_ERROR: i32 = -32004;
    pub const ASYNC_OPERATION_ERROR: i32 = -32005;
    pub const VALIDATION_ERROR: i32 = -32006;

    /// Reserved implementation-defined server error range.
    pub const RANGE: RangeInclusive<i32> = -32099..=-32000;
}

/// Every error that can be put on the wire.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {message}")]
    InvalidParams { message: String, data: Option<Value> },

    #[error("Internal error: {message}")]
    InternalError { message: String, data: Option<Value> },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("Async operation error: {0}")]
    AsyncOperation(String),

    #[error("Validation error: {message}")]
    Validation { message: String, data: Option<Value> },

    /// A handler-chosen code, propagated verbatim.
    #[error("{message}")]
    Custom {
        code: i32,
        message: String,
        data: Option<Value>,
    },
}

impl ProtocolError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        ProtocolError::InvalidParams {
            message: message.into(),
            data: None,
        }
    }

    pub fn internal(message: impl Into<String>, kind: &str) -> Self {
        ProtocolError::InternalError {
            message: message.into(),
            data: Some(json!({ "kind": kind })),
        }
    }

    pub fn code(&self) -> i32 {
        use app_error_codes::*;
        use error_codes::*;
        match self {
            ProtocolError::ParseError(_) => PARSE_ERROR,
            ProtocolError::InvalidRequest(_) => INVALID_REQUEST,
            ProtocolError::MethodNotFound(_) => METHOD_NOT_FOUND,
            ProtocolError::InvalidParams { .. } => INVALID_PARAMS,
            ProtocolError::InternalError { .. } => INTERNAL_ERROR,
            ProtocolError::Authentication(_) => AUTHENTICATION_ERROR,
            ProtocolError::Authorization(_) => AUTHORIZATION_ERROR,
            ProtocolError::RateLimitExceeded(_) => RATE_LIMIT_EXCEEDED,
            ProtocolError::Provider { .. } => PROVIDER_ERROR,
            ProtocolError::AsyncOperation(_) => ASYNC_OPERATION_ERROR,
            ProtocolError::Validation { .. } => VALIDATION_ERROR,
            ProtocolError::Custom { code, .. } => *code,
        }
    }

    pub fn data(&self) -> Option<Value> {
        match self {
            ProtocolError::InvalidParams { data, .. }
            | ProtocolError::InternalError { data, .. }
            | ProtocolError::Validation { data, .. }
            | ProtocolError::Custom { data, .. } => data.clone(),
            ProtocolError::Provider { provider, .. } => Some(json!({ "provider": provider })),
            _ => None,
        }
    }

    pub fn to_error_object(&self) -> JsonRpcErrorObject {
        JsonRpcErrorObject {
            code: self.code(),
            message: self.to_string(),
            data: self.data(),
        }
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        JsonRpcError::new(id, self.to_error_object())
    }
}

impl From<JsonRpcErrorObject> for ProtocolError {
    fn from(object: JsonRpcErrorObject) -> Self {
        ProtocolError::Custom {
            code: object.code,
            message: object.message,
            data: object.data,
        }
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
