//! External store seam.
//!
//! The engine never talks to a transport directly; everything it needs
//! from the persisted world goes through the [`SnapshotSource`] trait.
//! Implement the trait to wire the engine to a real backend. The
//! [`ScriptedSource`] implementation replays a recorded scenario and backs
//! the replay CLI and the integration tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::snapshot::{TaskSnapshot, TaskStatus};

/// Errors surfaced by a snapshot source.
///
/// The session treats both variants as transient for the status poll: the
/// failure is logged and polling continues, since a freshly created task
/// may not yet be visible to the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No task record exists for the given id.
    #[error("task {0} not found")]
    NotFound(String),
    /// The store could not be reached or answered with a transport-level
    /// failure.
    #[error("store request failed: {0}")]
    Transport(String),
}

/// Severity level of a generic application log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One issue found by a scan, as returned by the issue-list lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRecord {
    /// Severity bucket: `critical`, `high`, `medium` or `low`.
    pub severity: String,
    /// Short description of the issue.
    pub title: String,
}

/// One record from the generic application log store.
///
/// During Failed-state handling the engine consumes the `message` and
/// `nested` fields as its correlated-error projection; the record itself is
/// owned by the log store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppLogRecord {
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
    /// Severity level.
    pub level: LogLevel,
    /// Log message text.
    pub message: String,
    /// Nested error payload, shape-unspecified: a plain string, an object
    /// with a `message` field, or anything else the logger captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<serde_json::Value>,
}

/// Read (and one best-effort write) contract against the task store.
///
/// Implement this trait to add a real transport; each implementation
/// handles authentication and wire format for that backend.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetches the current persisted state of a task.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no record exists for the id,
    /// [`StoreError::Transport`] for any other failure.
    async fn get_task(&self, id: &str) -> Result<TaskSnapshot, StoreError>;

    /// Fetches the full issue list for a task. Called once, after the task
    /// is first observed Completed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the lookup fails; the caller degrades
    /// rather than propagating.
    async fn get_issues(&self, task_id: &str) -> Result<Vec<IssueRecord>, StoreError>;

    /// Fetches application log records written at or after `since`. Called
    /// once, after the task is first observed Failed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the lookup fails; the caller degrades
    /// rather than propagating.
    async fn get_recent_error_logs(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AppLogRecord>, StoreError>;

    /// Persists a status change for a task. Called at most once per
    /// session, on user cancellation, best-effort.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the write fails; the caller keeps its
    /// local state regardless.
    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<(), StoreError>;
}

/// A deterministic in-memory source that replays a recorded scenario.
///
/// Successive `get_task` calls walk the snapshot script in order; once the
/// script is exhausted the final snapshot keeps being served, which mimics
/// a store that has settled into a terminal record. An empty script
/// answers `NotFound` on every poll.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    snapshots: Vec<TaskSnapshot>,
    cursor: AtomicUsize,
    issues: Vec<IssueRecord>,
    error_logs: Vec<AppLogRecord>,
    fail_issue_fetch: bool,
    fail_log_fetch: bool,
    fail_status_update: bool,
    recorded_updates: Mutex<Vec<(String, TaskStatus)>>,
}

impl ScriptedSource {
    /// Creates a source that serves the given snapshot script.
    #[must_use]
    pub fn new(snapshots: Vec<TaskSnapshot>) -> Self {
        Self {
            snapshots,
            ..Self::default()
        }
    }

    /// Sets the issue list served by `get_issues`.
    #[must_use]
    pub fn with_issues(mut self, issues: Vec<IssueRecord>) -> Self {
        self.issues = issues;
        self
    }

    /// Sets the application log records served by `get_recent_error_logs`.
    #[must_use]
    pub fn with_error_logs(mut self, error_logs: Vec<AppLogRecord>) -> Self {
        self.error_logs = error_logs;
        self
    }

    /// Makes the issue-list lookup fail with a transport error.
    #[must_use]
    pub fn failing_issue_fetch(mut self) -> Self {
        self.fail_issue_fetch = true;
        self
    }

    /// Makes the log-window lookup fail with a transport error.
    #[must_use]
    pub fn failing_log_fetch(mut self) -> Self {
        self.fail_log_fetch = true;
        self
    }

    /// Makes the status write-back fail with a transport error.
    #[must_use]
    pub fn failing_status_update(mut self) -> Self {
        self.fail_status_update = true;
        self
    }

    /// Status updates received so far, in call order.
    #[must_use]
    pub fn recorded_updates(&self) -> Vec<(String, TaskStatus)> {
        self.recorded_updates
            .lock()
            .map(|updates| updates.clone())
            .unwrap_or_default()
    }

    /// Number of snapshot polls served so far.
    #[must_use]
    pub fn polls_served(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn get_task(&self, id: &str) -> Result<TaskSnapshot, StoreError> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let sticky = index.min(self.snapshots.len().saturating_sub(1));
        self.snapshots
            .get(sticky)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_issues(&self, task_id: &str) -> Result<Vec<IssueRecord>, StoreError> {
        if self.fail_issue_fetch {
            return Err(StoreError::Transport(format!(
                "issue lookup unavailable for {task_id}"
            )));
        }
        Ok(self.issues.clone())
    }

    async fn get_recent_error_logs(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AppLogRecord>, StoreError> {
        if self.fail_log_fetch {
            return Err(StoreError::Transport("log store unavailable".to_string()));
        }
        Ok(self
            .error_logs
            .iter()
            .filter(|record| record.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<(), StoreError> {
        if self.fail_status_update {
            return Err(StoreError::Transport(format!(
                "status update refused for {id}"
            )));
        }
        if let Ok(mut updates) = self.recorded_updates.lock() {
            updates.push((id.to_string(), status));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::snapshot::ProjectRef;

    fn snapshot(status: TaskStatus, scanned: u64) -> TaskSnapshot {
        TaskSnapshot {
            status,
            scanned_files: scanned,
            total_files: 10,
            issues_count: 0,
            total_lines: 0,
            quality_score: 0.0,
            created_at: Utc::now(),
            completed_at: None,
            project: ProjectRef::default(),
        }
    }

    mod scripted_source {
        use super::*;

        /// Tests that the script is served in order and the final snapshot
        /// is sticky once exhausted.
        #[tokio::test]
        async fn serves_script_in_order_then_sticks() {
            let source = ScriptedSource::new(vec![
                snapshot(TaskStatus::Pending, 0),
                snapshot(TaskStatus::Running, 5),
                snapshot(TaskStatus::Completed, 10),
            ]);

            let first = source.get_task("t").await;
            let second = source.get_task("t").await;
            let third = source.get_task("t").await;
            let fourth = source.get_task("t").await;

            assert_eq!(first.map(|s| s.status).ok(), Some(TaskStatus::Pending));
            assert_eq!(second.map(|s| s.status).ok(), Some(TaskStatus::Running));
            assert_eq!(third.map(|s| s.status).ok(), Some(TaskStatus::Completed));
            assert_eq!(fourth.map(|s| s.status).ok(), Some(TaskStatus::Completed));
            assert_eq!(source.polls_served(), 4);
        }

        /// Tests that an empty script answers not-found.
        #[tokio::test]
        async fn empty_script_is_not_found() {
            let source = ScriptedSource::new(Vec::new());
            let result = source.get_task("missing").await;
            assert!(matches!(result, Err(StoreError::NotFound(id)) if id == "missing"));
        }

        /// Tests that the log window filter respects `since`.
        #[tokio::test]
        async fn log_window_filters_by_since() {
            let now = Utc::now();
            let old = AppLogRecord {
                timestamp: now - chrono::Duration::seconds(120),
                level: LogLevel::Error,
                message: "old".to_string(),
                nested: None,
            };
            let fresh = AppLogRecord {
                timestamp: now,
                level: LogLevel::Error,
                message: "fresh".to_string(),
                nested: None,
            };
            let source =
                ScriptedSource::new(Vec::new()).with_error_logs(vec![old, fresh.clone()]);

            let window = source
                .get_recent_error_logs(now - chrono::Duration::seconds(60))
                .await
                .unwrap_or_default();

            assert_eq!(window, vec![fresh]);
        }

        /// Tests that status updates are recorded in call order.
        #[tokio::test]
        async fn records_status_updates() {
            let source = ScriptedSource::new(Vec::new());
            let result = source.update_task_status("t-1", TaskStatus::Cancelled).await;

            assert!(result.is_ok());
            assert_eq!(
                source.recorded_updates(),
                vec![("t-1".to_string(), TaskStatus::Cancelled)]
            );
        }

        /// Tests that scripted failures surface as transport errors.
        #[tokio::test]
        async fn scripted_failures_are_transport_errors() {
            let source = ScriptedSource::new(Vec::new())
                .failing_issue_fetch()
                .failing_log_fetch()
                .failing_status_update();

            assert!(matches!(
                source.get_issues("t").await,
                Err(StoreError::Transport(_))
            ));
            assert!(matches!(
                source.get_recent_error_logs(Utc::now()).await,
                Err(StoreError::Transport(_))
            ));
            assert!(matches!(
                source.update_task_status("t", TaskStatus::Cancelled).await,
                Err(StoreError::Transport(_))
            ));
        }
    }

    mod wire_format {
        use super::*;

        /// Tests that log levels deserialize from lowercase wire values.
        #[test]
        fn log_level_is_lowercase_on_the_wire() {
            let level: LogLevel =
                serde_json::from_str("\"error\"").unwrap_or(LogLevel::Debug);
            assert_eq!(level, LogLevel::Error);
        }

        /// Tests that a nested payload survives a round trip untouched.
        #[test]
        fn nested_payload_round_trips() {
            let record = AppLogRecord {
                timestamp: Utc::now(),
                level: LogLevel::Error,
                message: "scan worker crashed".to_string(),
                nested: Some(serde_json::json!({"message": "ECONNRESET"})),
            };
            let json = serde_json::to_string(&record).unwrap_or_default();
            let parsed: Result<AppLogRecord, _> = serde_json::from_str(&json);
            assert_eq!(parsed.ok(), Some(record));
        }
    }
}
