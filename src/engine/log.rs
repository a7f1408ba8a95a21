//! Typed log events for the synthesized terminal output.
//!
//! Events come in two shapes: [`LogLine`], the kind+message draft produced
//! by the pure synthesis code, and [`LogEvent`], the stamped append-only
//! record the session stores and exposes to the owning view.

use chrono::Local;
use serde::Serialize;

/// Width of the divider lines used inside summary blocks.
const DIVIDER_WIDTH: usize = 40;

/// Severity kind of a log event, used for styling by the owning view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LogKind {
    /// Neutral progress or context line.
    #[default]
    Info,
    /// Positive milestone.
    Success,
    /// Degraded but non-fatal condition.
    Warning,
    /// Failure line.
    Error,
}

/// An unstamped log line: what to say and how severe it is.
///
/// The session assigns the id and wall-clock timestamp when the line is
/// appended, so synthesis stays pure and order-independent to test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Severity kind.
    pub kind: LogKind,
    /// Message text. Empty text is a visual separator.
    pub message: String,
}

impl LogLine {
    /// Creates an info line.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Info,
            message: message.into(),
        }
    }

    /// Creates a success line.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Success,
            message: message.into(),
        }
    }

    /// Creates a warning line.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Warning,
            message: message.into(),
        }
    }

    /// Creates an error line.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Error,
            message: message.into(),
        }
    }

    /// Creates an empty separator line.
    #[must_use]
    pub fn blank() -> Self {
        Self {
            kind: LogKind::Info,
            message: String::new(),
        }
    }

    /// Creates a divider line for summary blocks.
    #[must_use]
    pub fn divider() -> Self {
        Self {
            kind: LogKind::Info,
            message: "─".repeat(DIVIDER_WIDTH),
        }
    }
}

/// One appended entry of the session's terminal log.
///
/// Events are append-only: once created they are never mutated or removed
/// for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    /// Session-scoped id, assigned in insertion order.
    pub id: u64,
    /// Wall-clock timestamp (HH:MM:SS) at append time.
    pub timestamp: String,
    /// Message text. Empty text is a visual separator.
    pub message: String,
    /// Severity kind.
    pub kind: LogKind,
}

impl LogEvent {
    /// Stamps a draft line into a stored event.
    #[must_use]
    pub fn stamp(id: u64, line: LogLine) -> Self {
        Self {
            id,
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            message: line.message,
            kind: line.kind,
        }
    }
}
