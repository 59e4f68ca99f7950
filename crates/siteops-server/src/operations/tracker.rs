//! Registry of long-running operations with progress pushes and a hard
//! timeout per operation.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

use siteops_rpc::{JsonRpcNotification, ProtocolError};

use crate::events::{EventBus, ServerEvent};
use crate::session::ConnectionId;
use crate::types::ProgressParams;

use super::record::{OperationId, OperationRecord, OperationStatus, OperationUpdate};

/// Where progress pushes are delivered.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Queue `notification` for `connection_id`. Returns `false` when the
    /// connection is gone; the push is then dropped.
    async fn notify(&self, connection_id: ConnectionId, notification: JsonRpcNotification) -> bool;

    /// Whether `connection_id` is live and not closing. New operations are
    /// refused for connections that are not.
    async fn is_open(&self, connection_id: ConnectionId) -> bool;
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Unknown operation: {0}")]
    NotFound(OperationId),

    #[error("Operation {id} already finished with status {status}")]
    AlreadyTerminal {
        id: OperationId,
        status: OperationStatus,
    },

    #[error("Connection {0} is closed; no new operations accepted")]
    ConnectionClosed(ConnectionId),
}

impl From<TrackerError> for ProtocolError {
    fn from(err: TrackerError) -> Self {
        ProtocolError::AsyncOperation(err.to_string())
    }
}

struct TrackedOperation {
    record: OperationRecord,
    timer: Option<AbortHandle>,
    purge: Option<AbortHandle>,
}

impl TrackedOperation {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn cancel_tasks(&mut self) {
        self.disarm();
        if let Some(purge) = self.purge.take() {
            purge.abort();
        }
    }
}

/// Tracks async operations for every connection.
pub struct OperationTracker {
    operations: Mutex<HashMap<OperationId, TrackedOperation>>,
    sink: Arc<dyn NotificationSink>,
    events: EventBus,
    default_timeout: Duration,
    retention: Duration,
    this: Weak<OperationTracker>,
}

impl OperationTracker {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        events: EventBus,
        default_timeout: Duration,
        retention: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            operations: Mutex::new(HashMap::new()),
            sink,
            events,
            default_timeout,
            retention,
            this: this.clone(),
        })
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Register a running operation under the default timeout.
    pub async fn start(
        &self,
        connection_id: ConnectionId,
        method: impl Into<String>,
        params: Value,
    ) -> Result<OperationId, TrackerError> {
        self.start_with_timeout(connection_id, method, params, self.default_timeout)
            .await
    }

    pub async fn start_with_timeout(
        &self,
        connection_id: ConnectionId,
        method: impl Into<String>,
        params: Value,
        timeout: Duration,
    ) -> Result<OperationId, TrackerError> {
        let record = OperationRecord::new(connection_id, method, params);
        let id = record.operation_id;
        let method = record.method.clone();

        {
            // Checked under the lock: `cancel_connection` runs only after the
            // connection stopped being open, so nothing slips in behind it.
            let mut operations = self.operations.lock().await;
            if !self.sink.is_open(connection_id).await {
                return Err(TrackerError::ConnectionClosed(connection_id));
            }
            let timer = self.arm_timer(id, timeout);
            operations.insert(
                id,
                TrackedOperation {
                    record,
                    timer: Some(timer),
                    purge: None,
                },
            );
        }

        tracing::debug!(operation_id = %id, %connection_id, %method, ?timeout, "Operation started");
        self.events.emit(ServerEvent::OperationStarted {
            operation_id: id,
            connection_id,
            method,
        });
        Ok(id)
    }

    /// Merge `update` into a running operation.
    ///
    /// A progress push goes out when status or progress changed. A terminal
    /// status disarms the timer and schedules the purge.
    pub async fn update(
        &self,
        id: OperationId,
        update: OperationUpdate,
    ) -> Result<OperationRecord, TrackerError> {
        let (snapshot, changed) = {
            let mut operations = self.operations.lock().await;
            let tracked = operations.get_mut(&id).ok_or(TrackerError::NotFound(id))?;
            if tracked.record.status.is_terminal() {
                return Err(TrackerError::AlreadyTerminal {
                    id,
                    status: tracked.record.status,
                });
            }

            let changed = tracked.record.apply(update, Utc::now());
            if tracked.record.status.is_terminal() {
                tracked.disarm();
                tracked.purge = Some(self.schedule_purge(id));
            }
            (tracked.record.clone(), changed)
        };

        if changed {
            self.push(&snapshot).await;
        }
        if snapshot.status.is_terminal() {
            self.finished(&snapshot);
        }
        Ok(snapshot)
    }

    /// Timer expiry. The only path that produces `timeout`.
    async fn expire(&self, id: OperationId, timeout: Duration) {
        let snapshot = {
            let mut operations = self.operations.lock().await;
            let Some(tracked) = operations.get_mut(&id) else {
                return;
            };
            if tracked.record.status.is_terminal() {
                return;
            }

            let error = ProtocolError::AsyncOperation(format!(
                "Operation timed out after {}s",
                timeout.as_secs()
            ));
            tracked.record.status = OperationStatus::Timeout;
            tracked.record.error = Some(error.to_error_object());
            tracked.record.last_update_time = Utc::now();
            tracked.timer = None;
            tracked.purge = Some(self.schedule_purge(id));
            tracked.record.clone()
        };

        tracing::warn!(operation_id = %id, method = %snapshot.method, "Operation timed out");
        self.push(&snapshot).await;
        self.finished(&snapshot);
    }

    /// Drop every operation owned by a closed connection.
    ///
    /// Running operations are marked failed first. No pushes are sent.
    /// Returns the number of running operations cancelled.
    pub async fn cancel_connection(&self, connection_id: ConnectionId) -> usize {
        let cancelled: Vec<OperationRecord> = {
            let mut operations = self.operations.lock().await;
            let owned: Vec<OperationId> = operations
                .iter()
                .filter(|(_, t)| t.record.connection_id == connection_id)
                .map(|(id, _)| *id)
                .collect();

            let now = Utc::now();
            let mut cancelled = Vec::new();
            for id in owned {
                let Some(mut tracked) = operations.remove(&id) else {
                    continue;
                };
                tracked.cancel_tasks();
                if !tracked.record.status.is_terminal() {
                    let error = ProtocolError::AsyncOperation(
                        "Connection closed before the operation finished".to_string(),
                    );
                    tracked.record.status = OperationStatus::Failed;
                    tracked.record.error = Some(error.to_error_object());
                    tracked.record.last_update_time = now;
                    cancelled.push(tracked.record);
                }
            }
            cancelled
        };

        for record in &cancelled {
            self.finished(record);
        }
        if !cancelled.is_empty() {
            tracing::info!(%connection_id, count = cancelled.len(), "Cancelled running operations");
        }
        cancelled.len()
    }

    pub async fn get(&self, id: OperationId) -> Option<OperationRecord> {
        let operations = self.operations.lock().await;
        operations.get(&id).map(|t| t.record.clone())
    }

    /// Operations owned by `connection_id`, oldest first.
    pub async fn list_for_connection(&self, connection_id: ConnectionId) -> Vec<OperationRecord> {
        let operations = self.operations.lock().await;
        let mut records: Vec<OperationRecord> = operations
            .values()
            .filter(|t| t.record.connection_id == connection_id)
            .map(|t| t.record.clone())
            .collect();
        records.sort_by_key(|r| r.start_time);
        records
    }

    pub async fn running_count(&self) -> usize {
        let operations = self.operations.lock().await;
        operations
            .values()
            .filter(|t| t.record.status == OperationStatus::Running)
            .count()
    }

    /// Total records held, terminal ones included.
    pub async fn len(&self) -> usize {
        self.operations.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn arm_timer(&self, id: OperationId, timeout: Duration) -> AbortHandle {
        let this = self.this.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tracker) = this.upgrade() {
                tracker.expire(id, timeout).await;
            }
        })
        .abort_handle()
    }

    fn schedule_purge(&self, id: OperationId) -> AbortHandle {
        let this = self.this.clone();
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if let Some(tracker) = this.upgrade() {
                tracker.purge(id).await;
            }
        })
        .abort_handle()
    }

    async fn purge(&self, id: OperationId) {
        let mut operations = self.operations.lock().await;
        let terminal = operations
            .get(&id)
            .is_some_and(|t| t.record.status.is_terminal());
        if terminal {
            operations.remove(&id);
            tracing::debug!(operation_id = %id, "Purged operation record");
        }
    }

    async fn push(&self, record: &OperationRecord) {
        let notification = ProgressParams::from_record(record).into_notification();
        if !self.sink.notify(record.connection_id, notification).await {
            tracing::debug!(
                operation_id = %record.operation_id,
                connection_id = %record.connection_id,
                "Progress push dropped, connection gone"
            );
        }
    }

    fn finished(&self, record: &OperationRecord) {
        self.events.emit(ServerEvent::OperationFinished {
            operation_id: record.operation_id,
            connection_id: record.connection_id,
            status: record.status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use siteops_rpc::app_error_codes::ASYNC_OPERATION_ERROR;

    #[derive(Default)]
    struct RecordingSink {
        pushed: std::sync::Mutex<Vec<(ConnectionId, JsonRpcNotification)>>,
        closed: std::sync::Mutex<Vec<ConnectionId>>,
    }

    impl RecordingSink {
        fn statuses(&self) -> Vec<String> {
            self.pushed
                .lock()
                .unwrap()
                .iter()
                .map(|(_, n)| n.params.as_ref().unwrap()["status"].as_str().unwrap().to_string())
                .collect()
        }

        fn count(&self) -> usize {
            self.pushed.lock().unwrap().len()
        }

        fn close(&self, connection_id: ConnectionId) {
            self.closed.lock().unwrap().push(connection_id);
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, connection_id: ConnectionId, notification: JsonRpcNotification) -> bool {
            self.pushed.lock().unwrap().push((connection_id, notification));
            true
        }

        async fn is_open(&self, connection_id: ConnectionId) -> bool {
            !self.closed.lock().unwrap().contains(&connection_id)
        }
    }

    fn tracker_with(sink: Arc<RecordingSink>, timeout: Duration) -> Arc<OperationTracker> {
        OperationTracker::new(sink, EventBus::default(), timeout, Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_running_to_completed() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker_with(sink.clone(), Duration::from_secs(300));
        let conn = ConnectionId::new();

        let id = tracker.start(conn, "site/backup", json!({"siteId": "s1"})).await.unwrap();
        let record = tracker.get(id).await.unwrap();
        assert_eq!(record.status, OperationStatus::Running);
        assert_eq!(record.progress, 0.0);
        assert_eq!(sink.count(), 0);

        tracker.update(id, OperationUpdate::progress(40.0)).await.unwrap();
        let done = tracker
            .update(id, OperationUpdate::completed(json!({"archive": "s1.tar"})))
            .await
            .unwrap();
        assert_eq!(done.status, OperationStatus::Completed);
        assert_eq!(done.progress, 100.0);
        assert_eq!(sink.statuses(), vec!["running", "completed"]);

        let err = tracker
            .update(id, OperationUpdate::progress(10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::AlreadyTerminal { .. }));
        assert_eq!(sink.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_progress_is_not_pushed() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker_with(sink.clone(), Duration::from_secs(300));
        let id = tracker.start(ConnectionId::new(), "store/sync", json!({})).await.unwrap();

        tracker.update(id, OperationUpdate::progress(25.0)).await.unwrap();
        tracker.update(id, OperationUpdate::progress(25.0)).await.unwrap();
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_progress_is_pushed() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker_with(sink.clone(), Duration::from_secs(300));
        let id = tracker.start(ConnectionId::new(), "store/import", json!({})).await.unwrap();

        tracker.update(id, OperationUpdate::progress(33.3)).await.unwrap();
        let record = tracker.update(id, OperationUpdate::progress(33.4)).await.unwrap();
        assert_eq!(record.progress, 33.4);
        assert_eq!(sink.count(), 2);

        let pushed = sink.pushed.lock().unwrap();
        assert_eq!(pushed[1].1.params.as_ref().unwrap()["progress"], json!(33.4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_refused_for_closed_connection() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker_with(sink.clone(), Duration::from_secs(300));
        let conn = ConnectionId::new();
        sink.close(conn);

        let err = tracker.start(conn, "site/backup", json!({})).await.unwrap_err();
        assert_eq!(err, TrackerError::ConnectionClosed(conn));
        assert!(tracker.is_empty().await);

        // No timer was armed either.
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_exactly_once() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker_with(sink.clone(), Duration::from_secs(300));
        let id = tracker
            .start_with_timeout(ConnectionId::new(), "site/migrate", json!({}), Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;

        let record = tracker.get(id).await.unwrap();
        assert_eq!(record.status, OperationStatus::Timeout);
        assert_eq!(record.error.as_ref().unwrap().code, ASYNC_OPERATION_ERROR);
        assert_eq!(sink.statuses(), vec!["timeout"]);

        assert!(tracker.update(id, OperationUpdate::completed(json!(null))).await.is_err());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_disarms_timer() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker_with(sink.clone(), Duration::from_secs(5));
        let id = tracker.start(ConnectionId::new(), "site/deploy", json!({})).await.unwrap();
        tracker.update(id, OperationUpdate::completed(json!("ok"))).await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(tracker.get(id).await.unwrap().status, OperationStatus::Completed);
        assert_eq!(sink.statuses(), vec!["completed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_records_purged_after_retention() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker_with(sink, Duration::from_secs(300));
        let id = tracker.start(ConnectionId::new(), "site/deploy", json!({})).await.unwrap();
        tracker
            .update(id, OperationUpdate::failed(&ProtocolError::Provider {
                provider: "cloudflare".into(),
                message: "zone locked".into(),
            }))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(tracker.get(id).await.is_some());
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(tracker.get(id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_connection_removes_owned_operations_silently() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker_with(sink.clone(), Duration::from_secs(300));
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        for n in 0..3 {
            tracker.start(a, "site/backup", json!({"n": n})).await.unwrap();
        }
        let other = tracker.start(b, "site/backup", json!({})).await.unwrap();
        assert_eq!(tracker.running_count().await, 4);

        assert_eq!(tracker.cancel_connection(a).await, 3);
        assert_eq!(tracker.running_count().await, 1);
        assert!(tracker.list_for_connection(a).await.is_empty());
        assert_eq!(tracker.list_for_connection(b).await[0].operation_id, other);
        assert_eq!(sink.count(), 0);

        // Their timers are gone too.
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_operation() {
        let tracker = tracker_with(Arc::new(RecordingSink::default()), Duration::from_secs(1));
        let id = OperationId::new();
        let err = tracker.update(id, OperationUpdate::progress(1.0)).await.unwrap_err();
        assert_eq!(err, TrackerError::NotFound(id));
        assert_eq!(ProtocolError::from(err).code(), ASYNC_OPERATION_ERROR);
    }
}
