//! Async operation tracking, independent of the request/response cycle.

pub mod record;
pub mod tracker;

pub use record::{OperationId, OperationRecord, OperationStatus, OperationUpdate, UpdateStatus};
pub use tracker::{NotificationSink, OperationTracker, TrackerError};
