//! Async operation records and the deltas applied to them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use siteops_rpc::{JsonRpcErrorObject, ProtocolError};

use crate::session::ConnectionId;

/// Opaque operation identifier handed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Completed,
    Failed,
    /// Set only by the tracker's own timer.
    Timeout,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OperationStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statuses a caller may request through an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Running,
    Completed,
    Failed,
}

impl From<UpdateStatus> for OperationStatus {
    fn from(status: UpdateStatus) -> Self {
        match status {
            UpdateStatus::Running => OperationStatus::Running,
            UpdateStatus::Completed => OperationStatus::Completed,
            UpdateStatus::Failed => OperationStatus::Failed,
        }
    }
}

/// A partial update merged into a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationUpdate {
    pub status: Option<UpdateStatus>,
    /// Percent complete; clamped to `0..=100` when applied.
    pub progress: Option<f64>,
    pub result: Option<Value>,
    pub error: Option<JsonRpcErrorObject>,
}

impl OperationUpdate {
    pub fn progress(percent: f64) -> Self {
        Self {
            progress: Some(percent),
            ..Self::default()
        }
    }

    pub fn completed(result: Value) -> Self {
        Self {
            status: Some(UpdateStatus::Completed),
            progress: Some(100.0),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: &ProtocolError) -> Self {
        Self {
            status: Some(UpdateStatus::Failed),
            error: Some(error.to_error_object()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: UpdateStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Server-side state of one long-running operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub operation_id: OperationId,
    pub connection_id: ConnectionId,
    pub method: String,
    pub params: Value,
    pub status: OperationStatus,
    /// Percent complete, `0.0..=100.0`.
    pub progress: f64,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl OperationRecord {
    pub fn new(connection_id: ConnectionId, method: impl Into<String>, params: Value) -> Self {
        let now = Utc::now();
        Self {
            operation_id: OperationId::new(),
            connection_id,
            method: method.into(),
            params,
            status: OperationStatus::Running,
            progress: 0.0,
            start_time: now,
            last_update_time: now,
            result: None,
            error: None,
        }
    }

    /// Merge `update` and stamp the update time.
    ///
    /// Returns whether status or progress changed, i.e. whether a progress
    /// push is owed.
    pub fn apply(&mut self, update: OperationUpdate, now: DateTime<Utc>) -> bool {
        let before = (self.status, self.progress);

        if let Some(status) = update.status {
            self.status = status.into();
        }
        if let Some(percent) = update.progress.and_then(clamp_progress) {
            self.progress = percent;
        }
        if update.result.is_some() {
            self.result = update.result;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        self.last_update_time = now;

        before != (self.status, self.progress)
    }
}
/// `None` for NaN, which leaves the stored progress untouched.
fn clamp_progress(percent: f64) -> Option<f64> {
    (!percent.is_nan()).then(|| percent.clamp(0.0, 100.0))
}
