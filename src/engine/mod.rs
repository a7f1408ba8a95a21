//! Reconciliation engine for audit task progress.

pub mod correlate;
pub mod delta;
pub mod log;
pub mod machine;
pub mod session;
pub mod snapshot;
pub mod synth;

pub use delta::{Delta, diff};
pub use log::{LogEvent, LogKind, LogLine};
pub use machine::{Applied, SessionState, TerminalFlags};
pub use session::{PollingSession, SessionEvent};
pub use snapshot::{ProjectRef, TaskSnapshot, TaskStatus};
pub use synth::SeverityHistogram;
