//! Reconciliation state machine over the task lifecycle.
//!
//! [`SessionState`] is the single mutable record behind a polling session:
//! the append-only log, the previously observed snapshot, and the one-way
//! terminal latch. Every polled snapshot funnels through
//! [`SessionState::apply_snapshot`], which is the only place state and log
//! may change in response to the store.

use crate::engine::delta::diff;
use crate::engine::log::{LogEvent, LogLine};
use crate::engine::snapshot::{TaskSnapshot, TaskStatus};
use crate::engine::synth;

/// One-way latch over the three mutually exclusive terminal states.
///
/// Once any bit is set, no further snapshot processing may re-open the
/// session: late responses are discarded without mutating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminalFlags {
    /// Completed summary has fired.
    pub completed: bool,
    /// Failed summary has fired.
    pub failed: bool,
    /// Cancellation (local or remote) has latched.
    pub cancelled: bool,
}

impl TerminalFlags {
    /// Returns true once any terminal state has latched.
    #[must_use]
    pub const fn any(&self) -> bool {
        self.completed || self.failed || self.cancelled
    }
}

/// Outcome of applying one polled snapshot.
#[derive(Debug, Default)]
pub struct Applied {
    /// Events appended by this application, in insertion order.
    pub events: Vec<LogEvent>,
    /// Set on the first observation of a terminal status; the caller runs
    /// the matching summary procedure exactly once.
    pub terminal: Option<TaskStatus>,
}

/// Mutable state of one polling session.
#[derive(Debug)]
pub struct SessionState {
    task_id: String,
    last_snapshot: Option<TaskSnapshot>,
    logs: Vec<LogEvent>,
    flags: TerminalFlags,
    initialized: bool,
    scan_started: bool,
    next_event_id: u64,
}

impl SessionState {
    /// Creates fresh state for the given task id.
    #[must_use]
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            last_snapshot: None,
            logs: Vec::new(),
            flags: TerminalFlags::default(),
            initialized: false,
            scan_started: false,
            next_event_id: 0,
        }
    }

    /// The task this session is reconciling.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The append-only log so far.
    #[must_use]
    pub fn logs(&self) -> &[LogEvent] {
        &self.logs
    }

    /// The most recently applied snapshot.
    #[must_use]
    pub fn last_snapshot(&self) -> Option<&TaskSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Current terminal latch.
    #[must_use]
    pub const fn flags(&self) -> TerminalFlags {
        self.flags
    }

    /// Returns true once the session reached any terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.flags.any()
    }

    /// Current lifecycle status as the owning view should render it. The
    /// latch wins over whatever the last snapshot said, so an optimistic
    /// local cancellation shows immediately.
    #[must_use]
    pub fn current_status(&self) -> TaskStatus {
        if self.flags.cancelled {
            TaskStatus::Cancelled
        } else if self.flags.failed {
            TaskStatus::Failed
        } else if self.flags.completed {
            TaskStatus::Completed
        } else {
            self.last_snapshot
                .as_ref()
                .map_or(TaskStatus::Pending, |snapshot| snapshot.status)
        }
    }

    /// Marks the one-time initialization as done. Returns true only on the
    /// first call, so the init block can never be emitted twice no matter
    /// how often `start` is re-invoked.
    pub fn mark_initialized(&mut self) -> bool {
        if self.initialized {
            return false;
        }
        self.initialized = true;
        true
    }

    /// Whether the init block has been emitted for this session.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Latches the cancelled flag for a user-initiated cancellation.
    /// Returns false when the session is already terminal, in which case
    /// the caller must not emit anything.
    pub fn latch_cancelled(&mut self) -> bool {
        if self.flags.any() {
            return false;
        }
        self.flags.cancelled = true;
        true
    }

    /// Stamps draft lines into stored events, appends them and returns the
    /// stamped copies for fan-out.
    pub fn push_lines(&mut self, lines: Vec<LogLine>) -> Vec<LogEvent> {
        let mut appended = Vec::with_capacity(lines.len());
        for line in lines {
            let event = LogEvent::stamp(self.next_event_id, line);
            self.next_event_id += 1;
            self.logs.push(event.clone());
            appended.push(event);
        }
        appended
    }

    /// Applies one polled snapshot: diff, synthesize, latch.
    ///
    /// A snapshot arriving after the terminal latch is discarded entirely
    /// (check-apply); the caller is expected to have checked the latch
    /// before issuing the fetch as well, but only this check is load-
    /// bearing.
    pub fn apply_snapshot(&mut self, next: TaskSnapshot) -> Applied {
        if self.flags.any() {
            return Applied::default();
        }

        let delta = diff(self.last_snapshot.as_ref(), &next);
        let prev = self.last_snapshot.clone();
        let mut applied = Applied::default();

        match next.status {
            // Silent phase: a job sitting in a queue makes no noise.
            TaskStatus::Pending => {}
            TaskStatus::Running => {
                if delta.status_changed && !self.scan_started {
                    self.scan_started = true;
                    applied
                        .events
                        .extend(self.push_lines(synth::scan_started_block(&next)));
                }
                if let Some(prev) = &prev {
                    applied
                        .events
                        .extend(self.push_lines(synth::progress_lines(prev, &next, delta)));
                }
            }
            TaskStatus::Completed => {
                self.flags.completed = true;
                applied.terminal = Some(TaskStatus::Completed);
            }
            TaskStatus::Failed => {
                self.flags.failed = true;
                applied.terminal = Some(TaskStatus::Failed);
            }
            TaskStatus::Cancelled => {
                self.flags.cancelled = true;
                applied.terminal = Some(TaskStatus::Cancelled);
            }
        }

        self.last_snapshot = Some(next);
        applied
    }
}
