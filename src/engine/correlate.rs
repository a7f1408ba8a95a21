//! Failure correlation: best-effort diagnostics for a failed task.
//!
//! On entry to Failed the engine has nothing but the task record itself,
//! which rarely says why a scan died. This module queries the generic
//! application log store for recent error records that look related and
//! turns them into a diagnostic block; when nothing matches (or the log
//! store itself is down) it falls back to a static list of probable
//! causes rather than leaving the user with a bare failure line.

use chrono::{Duration, Utc};

use crate::engine::log::LogLine;
use crate::store::{AppLogRecord, LogLevel, SnapshotSource};

/// Messages containing either keyword count as related to the audit
/// domain even when they do not name the task id.
const DOMAIN_KEYWORDS: [&str; 2] = ["audit", "scan"];

/// Generic probable causes emitted when no correlated record is found.
const FALLBACK_CAUSES: [&str; 4] = [
    "Possible cause: network connectivity to the analysis backend",
    "Possible cause: expired or missing access token",
    "Possible cause: rate limiting by the upstream provider",
    "Possible cause: model or quota misconfiguration",
];

/// Closing hints, always emitted.
const CLOSING_HINTS: [&str; 2] = [
    "Hint: check the project configuration and credentials",
    "Hint: open the application logs for the full error trail",
];

/// Extracts a display string from a nested error payload of unknown
/// shape: a plain string passes through, an object contributes its
/// `message` field, anything else is JSON-stringified.
fn unwrap_nested(payload: &serde_json::Value) -> String {
    if let Some(text) = payload.as_str() {
        return text.to_string();
    }
    if let Some(message) = payload.get("message").and_then(serde_json::Value::as_str) {
        return message.to_string();
    }
    payload.to_string()
}

/// Returns true when a log record plausibly relates to the failed task.
fn is_related(record: &AppLogRecord, task_id: &str) -> bool {
    record.level == LogLevel::Error
        && (record.message.contains(task_id)
            || DOMAIN_KEYWORDS
                .iter()
                .any(|keyword| record.message.contains(keyword)))
}

/// Builds the Failed summary block.
///
/// Queries error logs within the last `window_secs` seconds, keeps the
/// `max_entries` most recent related records, and degrades to the static
/// fallback when the query fails or nothing matches. The block always
/// closes with a divider and the two static hints.
pub async fn failed_summary(
    source: &dyn SnapshotSource,
    task_id: &str,
    window_secs: i64,
    max_entries: usize,
) -> Vec<LogLine> {
    let mut lines = vec![
        LogLine::blank(),
        LogLine::error("Audit failed"),
        LogLine::divider(),
    ];

    let since = Utc::now() - Duration::seconds(window_secs);
    let mut related: Vec<AppLogRecord> = source
        .get_recent_error_logs(since)
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|record| is_related(record, task_id))
        .collect();
    related.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    related.truncate(max_entries);

    if related.is_empty() {
        for cause in FALLBACK_CAUSES {
            lines.push(LogLine::info(cause));
        }
    } else {
        for record in &related {
            lines.push(LogLine::error(record.message.clone()));
            if let Some(nested) = &record.nested {
                lines.push(LogLine::info(format!("  ↳ {}", unwrap_nested(nested))));
            }
        }
    }

    lines.push(LogLine::divider());
    for hint in CLOSING_HINTS {
        lines.push(LogLine::info(hint));
    }
    lines
}
