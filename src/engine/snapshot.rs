//! Polled read model of an audit task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an audit task as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued, not yet picked up by a scanner.
    #[default]
    Pending,
    /// Scan in progress.
    Running,
    /// Scan finished successfully.
    Completed,
    /// Scan aborted with an error.
    Failed,
    /// Scan stopped by a user.
    Cancelled,
}

impl TaskStatus {
    /// Returns true once no further transitions can occur.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns a human-readable name for the status.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }
}

/// Project the audited task belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    /// Display name of the project.
    pub name: String,
    /// Branch under audit, when the project is branch-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// One polled, point-in-time read of a task's persisted state.
///
/// Counts are expected to be non-decreasing while the task is `Running`;
/// the engine tolerates violations (slightly out-of-order responses) by
/// treating them as no-ops rather than reporting a rewind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Files scanned so far.
    pub scanned_files: u64,
    /// Total files in scope for the scan.
    pub total_files: u64,
    /// Issues found so far.
    pub issues_count: u64,
    /// Lines analyzed so far.
    pub total_lines: u64,
    /// Quality score out of 100, populated near completion.
    pub quality_score: f64,
    /// When the task record was created.
    pub created_at: DateTime<Utc>,
    /// When the task reached a terminal state, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Project the task belongs to.
    pub project: ProjectRef,
}

impl TaskSnapshot {
    /// Elapsed whole seconds between creation and completion, rounded to
    /// the nearest integer. `None` unless both timestamps are present.
    #[must_use]
    pub fn elapsed_secs(&self) -> Option<i64> {
        let completed = self.completed_at?;
        let millis = (completed - self.created_at).num_milliseconds();
        #[allow(clippy::cast_possible_truncation)]
        Some(((millis as f64) / 1000.0).round() as i64)
    }
}
