//! Field-level diffing between consecutive task snapshots.

use crate::engine::snapshot::TaskSnapshot;

/// Which observable fields changed between two consecutive snapshots.
///
/// "Changed" is plain inequality. Whether a change is *reportable* (forward
/// progress worth a log line) is decided by the synthesizer, which also
/// requires the value to have increased; a changed-but-decreased count is
/// tolerated silently to protect against out-of-order polling responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delta {
    /// Lifecycle status differs.
    pub status_changed: bool,
    /// Scanned-file count differs.
    pub files_changed: bool,
    /// Issue count differs.
    pub issues_changed: bool,
    /// Analyzed-line count differs.
    pub lines_changed: bool,
}

impl Delta {
    /// Returns true if any observed field changed on this poll.
    ///
    /// A tick with no change at all must stay out of the visible log, so
    /// repeated no-op network probes leave no trace.
    #[must_use]
    pub const fn has_data_change(&self) -> bool {
        self.status_changed || self.files_changed || self.issues_changed || self.lines_changed
    }
}

/// Computes the delta between the previously observed snapshot and a fresh
/// one.
///
/// On the first poll (`prev` is `None`) the status counts as changed,
/// since the session has never seen one, while the numeric fields do not:
/// a count that merely appears with the first response is not forward
/// progress.
#[must_use]
pub fn diff(prev: Option<&TaskSnapshot>, next: &TaskSnapshot) -> Delta {
    match prev {
        None => Delta {
            status_changed: true,
            ..Delta::default()
        },
        Some(prev) => Delta {
            status_changed: next.status != prev.status,
            files_changed: next.scanned_files != prev.scanned_files,
            issues_changed: next.issues_count != prev.issues_count,
            lines_changed: next.total_lines != prev.total_lines,
        },
    }
}
