//! Out-of-band progress pushes for async operations.

use serde::Serialize;
use serde_json::Value;

use siteops_rpc::{JsonRpcErrorObject, JsonRpcNotification};

use crate::operations::{OperationId, OperationRecord, OperationStatus};

/// Method name of the progress push.
pub const PROGRESS_METHOD: &str = "progress";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    pub operation_id: OperationId,
    pub status: OperationStatus,
    pub progress: f64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl ProgressParams {
    pub fn from_record(record: &OperationRecord) -> Self {
        Self {
            operation_id: record.operation_id,
            status: record.status,
            progress: record.progress,
            method: record.method.clone(),
            result: record.result.clone(),
            error: record.error.clone(),
        }
    }

    pub fn into_notification(self) -> JsonRpcNotification {
        JsonRpcNotification::new(PROGRESS_METHOD, serde_json::to_value(self).ok())
    }
}
