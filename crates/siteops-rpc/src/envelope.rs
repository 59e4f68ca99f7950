//! Envelope-shape validation, the first of the two request checks.

use serde_json::Value;

use crate::error::ProtocolError;
use crate::message::{JsonRpcRequest, RequestId, JSONRPC_VERSION};

/// An envelope that failed shape validation.
///
/// `id` is the id the rejection should be answered with: the request's own
/// id when it was well-typed, `Null` when the id itself was malformed, and
/// `None` when the envelope carried no id (no response is owed).
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeRejection {
    pub id: Option<RequestId>,
    pub error: ProtocolError,
}

/// Check envelope shape and turn a raw message into a request.
pub fn validate_envelope(message: Value) -> Result<JsonRpcRequest, EnvelopeRejection> {
    let Value::Object(mut fields) = message else {
        return Err(EnvelopeRejection {
            id: None,
            error: ProtocolError::InvalidRequest("Envelope must be a JSON object".to_string()),
        });
    };

    let raw_id = fields.remove("id");
    let id = raw_id.as_ref().map(RequestId::from_value);
    let reply_to = match &id {
        None => None,
        Some(Some(valid)) => Some(valid.clone()),
        Some(None) => Some(RequestId::Null),
    };
    let reject = |message: String| EnvelopeRejection {
        id: reply_to.clone(),
        error: ProtocolError::InvalidRequest(message),
    };

    match fields.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(other) => {
            return Err(reject(format!(
                "Expected jsonrpc version \"{JSONRPC_VERSION}\", got {other}"
            )))
        }
        None => return Err(reject("Missing jsonrpc version".to_string())),
    }

    let method = match fields.remove("method") {
        Some(Value::String(m)) if !m.is_empty() => m,
        Some(Value::String(_)) => return Err(reject("Method name must not be empty".to_string())),
        Some(_) => return Err(reject("Method name must be a string".to_string())),
        None => return Err(reject("Missing method name".to_string())),
    };

    let id = match id {
        Some(None) => {
            return Err(reject(
                "Request id must be a string, number, or null".to_string(),
            ))
        }
        Some(Some(valid)) => Some(valid),
        None => None,
    };

    let params = match fields.remove("params") {
        None => None,
        Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p),
        Some(_) => return Err(reject("Params must be an object or an array".to_string())),
    };

    Ok(JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        method,
        params,
        id,
    })
}
