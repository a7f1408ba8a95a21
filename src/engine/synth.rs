//! Log synthesis: turns deltas and lifecycle transitions into draft lines.
//!
//! Everything here is pure. The session stamps drafts into stored events
//! and decides *when* a block may fire; these functions only decide what
//! the block says.

use crate::engine::delta::Delta;
use crate::engine::log::LogLine;
use crate::engine::snapshot::TaskSnapshot;
use crate::store::IssueRecord;

/// One-time initialization block emitted when a session starts, before the
/// first fetch completes.
#[must_use]
pub fn init_block(task_id: &str) -> Vec<LogLine> {
    vec![
        LogLine::success("Audit task started"),
        LogLine::info(format!("Task id: {task_id}")),
        LogLine::info("Task type: code audit"),
        LogLine::info("Initializing audit environment..."),
    ]
}

/// Block emitted on the first observation of `Running`.
#[must_use]
pub fn scan_started_block(next: &TaskSnapshot) -> Vec<LogLine> {
    let mut lines = vec![
        LogLine::success("Scan started"),
        LogLine::info(format!("Project: {}", next.project.name)),
    ];
    if let Some(branch) = &next.project.branch {
        lines.push(LogLine::info(format!("Branch: {branch}")));
    }
    lines
}

/// Progress percentage, rounded to the nearest integer.
///
/// A zero total yields 0 rather than a division error. Tasks are visible
/// to the store before their file inventory is known.
#[must_use]
pub fn progress_percent(scanned: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    {
        ((scanned as f64) * 100.0 / (total as f64)).round() as u64
    }
}

/// Per-tick progress lines for a running task.
///
/// Each count line requires both a registered change and an actual
/// increase; a decreased count is discarded so an out-of-order response
/// never renders as a rewind.
#[must_use]
pub fn progress_lines(prev: &TaskSnapshot, next: &TaskSnapshot, delta: Delta) -> Vec<LogLine> {
    let mut lines = Vec::new();

    if delta.files_changed && next.scanned_files > prev.scanned_files {
        let increment = next.scanned_files - prev.scanned_files;
        let percent = progress_percent(next.scanned_files, next.total_files);
        lines.push(LogLine::info(format!(
            "Scanned {}/{} files ({percent}%) [+{increment}]",
            next.scanned_files, next.total_files
        )));
    }

    if delta.issues_changed && next.issues_count > prev.issues_count {
        let increment = next.issues_count - prev.issues_count;
        lines.push(LogLine::warning(format!(
            "New issues detected [+{increment}], {} total",
            next.issues_count
        )));
    }

    if delta.lines_changed && next.total_lines > prev.total_lines {
        let increment = next.total_lines - prev.total_lines;
        lines.push(LogLine::info(format!(
            "Lines analyzed [+{increment}], {} total",
            next.total_lines
        )));
    }

    lines
}

/// Issue counts bucketed by exact severity match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeverityHistogram {
    /// Issues with severity `critical`.
    pub critical: usize,
    /// Issues with severity `high`.
    pub high: usize,
    /// Issues with severity `medium`.
    pub medium: usize,
    /// Issues with severity `low`.
    pub low: usize,
}

impl SeverityHistogram {
    /// Buckets an issue list by exact severity match. Unknown severities
    /// are ignored.
    #[must_use]
    pub fn from_issues(issues: &[IssueRecord]) -> Self {
        let mut histogram = Self::default();
        for issue in issues {
            match issue.severity.as_str() {
                "critical" => histogram.critical += 1,
                "high" => histogram.high += 1,
                "medium" => histogram.medium += 1,
                "low" => histogram.low += 1,
                _ => {}
            }
        }
        histogram
    }

    /// Buckets in descending severity order, with display labels.
    #[must_use]
    pub const fn buckets(&self) -> [(&'static str, usize); 4] {
        [
            ("critical", self.critical),
            ("high", self.high),
            ("medium", self.medium),
            ("low", self.low),
        ]
    }
}

/// Summary block for a completed scan.
///
/// The histogram is `None` when the secondary issue fetch failed; the
/// summary then simply omits those lines.
#[must_use]
pub fn completed_summary(
    snapshot: &TaskSnapshot,
    histogram: Option<&SeverityHistogram>,
) -> Vec<LogLine> {
    let mut lines = vec![
        LogLine::blank(),
        LogLine::success("Scan complete"),
        LogLine::divider(),
        LogLine::info(format!("Files scanned: {}", snapshot.total_files)),
        LogLine::info(format!("Lines analyzed: {}", snapshot.total_lines)),
    ];

    let issues_line = format!("Issues found: {}", snapshot.issues_count);
    if snapshot.issues_count > 0 {
        lines.push(LogLine::warning(issues_line));
    } else {
        lines.push(LogLine::success(issues_line));
    }

    if let Some(histogram) = histogram {
        for (label, count) in histogram.buckets() {
            if count > 0 {
                lines.push(LogLine::warning(format!("  {label}: {count}")));
            }
        }
    }

    lines.push(LogLine::info(format!(
        "Quality score: {}/100",
        snapshot.quality_score
    )));
    lines.push(LogLine::divider());
    lines.push(LogLine::success("Task finished"));

    if let Some(secs) = snapshot.elapsed_secs() {
        lines.push(LogLine::info(format!("Elapsed time: {secs}s")));
    }

    lines
}

/// Summary block for a cancelled scan. No secondary fetch is involved; the
/// bullets reflect whatever the last snapshot reported, or zeros when the
/// task was cancelled before the first response arrived.
#[must_use]
pub fn cancelled_summary(snapshot: Option<&TaskSnapshot>) -> Vec<LogLine> {
    let (scanned, total, issues, lines_count) = snapshot.map_or((0, 0, 0, 0), |s| {
        (s.scanned_files, s.total_files, s.issues_count, s.total_lines)
    });

    vec![
        LogLine::blank(),
        LogLine::warning("Task cancelled by user"),
        LogLine::divider(),
        LogLine::info(format!("• Files scanned: {scanned}/{total}")),
        LogLine::info(format!("• Issues found: {issues}")),
        LogLine::info(format!("• Lines analyzed: {lines_count}")),
        LogLine::divider(),
        LogLine::info("Partial results saved"),
    ]
}
