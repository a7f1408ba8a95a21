//! Polling session orchestration.
//!
//! [`PollingSession`] owns the timer loop that reconciles one audit task:
//! it fetches snapshots at a fixed interval, funnels them through the
//! state machine, fans the synthesized log out to the owning view over an
//! event channel, and runs the terminal summary procedure exactly once.
//!
//! The session state lives behind one async mutex. The loop re-checks the
//! terminal latch both before issuing a fetch and immediately before
//! applying its result, so a response that arrives after cancellation or
//! a duplicate terminal report is discarded without a trace.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::config::EngineConfig;
use crate::engine::correlate;
use crate::engine::log::{LogEvent, LogLine};
use crate::engine::machine::SessionState;
use crate::engine::snapshot::TaskStatus;
use crate::engine::synth::{self, SeverityHistogram};
use crate::store::SnapshotSource;

/// Events fanned out to the owning view.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A log event was appended.
    Log(LogEvent),
    /// The rendered lifecycle status changed.
    StatusChanged(TaskStatus),
    /// The session reached a terminal state and stopped polling.
    Done,
}

/// Live half of a session: the task being reconciled, its state, and the
/// handle of the spawned timer loop.
struct ActiveSession {
    task_id: String,
    state: Arc<Mutex<SessionState>>,
    poll_handle: JoinHandle<()>,
}

/// Controller for one task-progress view.
///
/// At most one task is reconciled at a time: starting a different id
/// resets the session first, starting the same id again is a no-op.
pub struct PollingSession {
    source: Arc<dyn SnapshotSource>,
    config: EngineConfig,
    events_tx: mpsc::Sender<SessionEvent>,
    active: Option<ActiveSession>,
}

impl PollingSession {
    /// Creates an idle controller. Events are fanned out on `events_tx`;
    /// the caller keeps the receiving half.
    #[must_use]
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        config: EngineConfig,
        events_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            source,
            config: config.normalized(),
            events_tx,
            active: None,
        }
    }

    /// Starts (or restarts) reconciliation for a task.
    ///
    /// Re-invoking with the id already being reconciled is a no-op: the
    /// one-time initialization block is guarded by the session's
    /// `initialized` flag, never re-derived from log contents. A
    /// different id tears the previous session down first.
    pub async fn start(&mut self, task_id: &str) {
        if let Some(active) = &self.active
            && active.task_id == task_id
            && active.state.lock().await.is_initialized()
        {
            return;
        }
        self.teardown();

        let state = Arc::new(Mutex::new(SessionState::new(task_id)));

        // Init block fires before the first fetch completes.
        {
            let mut guard = state.lock().await;
            if guard.mark_initialized() {
                let events = guard.push_lines(synth::init_block(task_id));
                drop(guard);
                send_logs(&self.events_tx, events).await;
            }
        }

        let poll_handle = tokio::spawn(poll_loop(
            task_id.to_string(),
            Arc::clone(&state),
            Arc::clone(&self.source),
            self.config.clone(),
            self.events_tx.clone(),
        ));

        self.active = Some(ActiveSession {
            task_id: task_id.to_string(),
            state,
            poll_handle,
        });
    }

    /// Cancels the task on behalf of the user.
    ///
    /// The local transition is optimistic and synchronous: the cancelled
    /// latch, log line and summary land before any network round trip.
    /// Persisting the cancellation to the store is attempted once; a
    /// failure degrades to a soft warning and never rolls the local state
    /// back.
    pub async fn cancel(&self) {
        let Some(active) = &self.active else {
            return;
        };

        let events = {
            let mut state = active.state.lock().await;
            if !state.latch_cancelled() {
                return;
            }
            let mut events =
                state.push_lines(vec![LogLine::warning("Cancel requested by user")]);
            let snapshot = state.last_snapshot().cloned();
            events.extend(state.push_lines(synth::cancelled_summary(snapshot.as_ref())));
            events
        };
        send_logs(&self.events_tx, events).await;
        self.events_tx
            .send(SessionEvent::StatusChanged(TaskStatus::Cancelled))
            .await
            .ok();

        // Best-effort write-back, one attempt, no retry.
        if let Err(error) = self
            .source
            .update_task_status(&active.task_id, TaskStatus::Cancelled)
            .await
        {
            let events = active.state.lock().await.push_lines(vec![LogLine::warning(
                format!("Failed to persist cancellation: {error}"),
            )]);
            send_logs(&self.events_tx, events).await;
        }
    }

    /// Stops the timer and clears all session state. Safe to call when no
    /// session is active, and safe to call repeatedly.
    pub fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            active.poll_handle.abort();
        }
    }

    /// Whether a session is currently held.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The id of the task being reconciled, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.task_id.as_str())
    }

    /// Read-only copy of the log sequence so far.
    pub async fn logs(&self) -> Vec<LogEvent> {
        match &self.active {
            Some(active) => active.state.lock().await.logs().to_vec(),
            None => Vec::new(),
        }
    }

    /// The lifecycle status the owning view should render.
    pub async fn status(&self) -> TaskStatus {
        match &self.active {
            Some(active) => active.state.lock().await.current_status(),
            None => TaskStatus::Pending,
        }
    }
}

impl Drop for PollingSession {
    fn drop(&mut self) {
        // The timer handle must not outlive the owning view.
        self.teardown();
    }
}

async fn send_logs(tx: &mpsc::Sender<SessionEvent>, events: Vec<LogEvent>) {
    for event in events {
        tx.send(SessionEvent::Log(event)).await.ok();
    }
}

/// The timer loop: one fetch per tick until a terminal latch stops it.
async fn poll_loop(
    task_id: String,
    state: Arc<Mutex<SessionState>>,
    source: Arc<dyn SnapshotSource>,
    config: EngineConfig,
    tx: mpsc::Sender<SessionEvent>,
) {
    let mut ticker = interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_status = None;

    loop {
        ticker.tick().await;

        // A tick may already be queued when a previous tick (or a user
        // cancellation) latched a terminal state.
        if state.lock().await.is_terminal() {
            break;
        }

        match source.get_task(&task_id).await {
            Ok(snapshot) => {
                let (events, terminal, status) = {
                    let mut guard = state.lock().await;
                    // Check-apply: the latch may have been set while the
                    // fetch was in flight.
                    if guard.is_terminal() {
                        break;
                    }
                    let applied = guard.apply_snapshot(snapshot);
                    (applied.events, applied.terminal, guard.current_status())
                };

                send_logs(&tx, events).await;
                if last_status != Some(status) {
                    last_status = Some(status);
                    tx.send(SessionEvent::StatusChanged(status)).await.ok();
                }

                match terminal {
                    Some(TaskStatus::Completed) => {
                        run_completed_summary(&task_id, &state, source.as_ref(), &tx).await;
                        break;
                    }
                    Some(TaskStatus::Failed) => {
                        run_failed_summary(&task_id, &state, source.as_ref(), &config, &tx).await;
                        break;
                    }
                    Some(TaskStatus::Cancelled) => {
                        run_remote_cancelled_summary(&state, &tx).await;
                        break;
                    }
                    _ => {}
                }
            }
            Err(error) => {
                // Transient by definition: not-found and transport errors
                // alike are logged and retried on the next tick.
                let events = {
                    let mut guard = state.lock().await;
                    if guard.is_terminal() {
                        break;
                    }
                    guard.push_lines(vec![LogLine::error(format!(
                        "Status fetch failed: {error}"
                    ))])
                };
                send_logs(&tx, events).await;
            }
        }
    }

    tx.send(SessionEvent::Done).await.ok();
}

/// Completed summary: one secondary issue fetch for the severity
/// histogram; a failed fetch silently omits it.
async fn run_completed_summary(
    task_id: &str,
    state: &Arc<Mutex<SessionState>>,
    source: &dyn SnapshotSource,
    tx: &mpsc::Sender<SessionEvent>,
) {
    let Some(snapshot) = state.lock().await.last_snapshot().cloned() else {
        return;
    };

    let histogram = match source.get_issues(task_id).await {
        Ok(issues) => Some(SeverityHistogram::from_issues(&issues)),
        Err(_) => None,
    };

    let events = state
        .lock()
        .await
        .push_lines(synth::completed_summary(&snapshot, histogram.as_ref()));
    send_logs(tx, events).await;
}

/// Failed summary via the failure correlator.
async fn run_failed_summary(
    task_id: &str,
    state: &Arc<Mutex<SessionState>>,
    source: &dyn SnapshotSource,
    config: &EngineConfig,
    tx: &mpsc::Sender<SessionEvent>,
) {
    let lines = correlate::failed_summary(
        source,
        task_id,
        config.correlation_window_secs,
        config.max_correlated_entries,
    )
    .await;
    let events = state.lock().await.push_lines(lines);
    send_logs(tx, events).await;
}

/// Cancelled summary for a cancellation that happened elsewhere and was
/// observed through the poll. No secondary fetch.
async fn run_remote_cancelled_summary(
    state: &Arc<Mutex<SessionState>>,
    tx: &mpsc::Sender<SessionEvent>,
) {
    let events = {
        let mut guard = state.lock().await;
        let snapshot = guard.last_snapshot().cloned();
        guard.push_lines(synth::cancelled_summary(snapshot.as_ref()))
    };
    send_logs(tx, events).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::snapshot::{ProjectRef, TaskSnapshot};
    use crate::store::{AppLogRecord, IssueRecord, LogLevel, ScriptedSource};
    use chrono::Utc;
    use std::time::Duration;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            poll_interval_ms: 10,
            ..EngineConfig::default()
        }
    }

    fn snapshot(status: TaskStatus, scanned: u64, issues: u64, lines: u64) -> TaskSnapshot {
        TaskSnapshot {
            status,
            scanned_files: scanned,
            total_files: 10,
            issues_count: issues,
            total_lines: lines,
            quality_score: 91.2,
            created_at: Utc::now(),
            completed_at: None,
            project: ProjectRef {
                name: "backend".to_string(),
                branch: Some("main".to_string()),
            },
        }
    }

    /// Collects session events until `Done` arrives or the deadline hits.
    async fn collect_until_done(
        mut rx: mpsc::Receiver<SessionEvent>,
        timeout_ms: u64,
    ) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(SessionEvent::Done) => {
                            events.push(SessionEvent::Done);
                            break;
                        }
                        Some(event) => events.push(event),
                        None => break,
                    }
                }
                () = tokio::time::sleep_until(deadline) => break,
            }
        }
        events
    }

    fn log_messages(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Log(log) => Some(log.message.clone()),
                _ => None,
            })
            .collect()
    }

    mod start {
        use super::*;

        /// Tests that the init block is emitted before the first fetch and
        /// exactly once for repeated starts with the same id.
        #[tokio::test]
        async fn init_block_fires_once_for_same_id() {
            let source = Arc::new(ScriptedSource::new(vec![snapshot(
                TaskStatus::Pending,
                0,
                0,
                0,
            )]));
            let (tx, rx) = mpsc::channel(256);
            let mut session = PollingSession::new(source, fast_config(), tx);

            session.start("task-7").await;
            session.start("task-7").await;
            session.start("task-7").await;

            tokio::time::sleep(Duration::from_millis(50)).await;
            session.teardown();
            drop(session);
            let events = collect_until_done(rx, 100).await;

            let started = log_messages(&events)
                .iter()
                .filter(|m| m.as_str() == "Audit task started")
                .count();
            assert_eq!(started, 1);
        }

        /// Tests that starting a different id resets the session.
        #[tokio::test]
        async fn different_id_resets_session() {
            let source = Arc::new(ScriptedSource::new(vec![snapshot(
                TaskStatus::Pending,
                0,
                0,
                0,
            )]));
            let (tx, rx) = mpsc::channel(256);
            let mut session = PollingSession::new(source, fast_config(), tx);

            session.start("task-1").await;
            session.start("task-2").await;
            assert_eq!(session.task_id(), Some("task-2"));

            session.teardown();
            drop(session);
            let events = collect_until_done(rx, 100).await;
            let messages = log_messages(&events);

            assert!(messages.contains(&"Task id: task-1".to_string()));
            assert!(messages.contains(&"Task id: task-2".to_string()));
        }
    }

    mod polling {
        use super::*;

        /// Tests a full happy path: Pending, Running 0/10, Running 5/10,
        /// Completed, with a histogram from the issue list and no elapsed
        /// line without `completed_at`.
        #[tokio::test]
        async fn completion_flow_emits_expected_sequence() {
            let source = Arc::new(
                ScriptedSource::new(vec![
                    snapshot(TaskStatus::Pending, 0, 0, 0),
                    snapshot(TaskStatus::Running, 0, 0, 0),
                    snapshot(TaskStatus::Running, 5, 0, 0),
                    snapshot(TaskStatus::Completed, 10, 2, 500),
                ])
                .with_issues(vec![
                    IssueRecord {
                        severity: "critical".to_string(),
                        title: "hardcoded secret".to_string(),
                    },
                    IssueRecord {
                        severity: "high".to_string(),
                        title: "sql injection".to_string(),
                    },
                ]),
            );
            let (tx, rx) = mpsc::channel(256);
            let mut session = PollingSession::new(source, fast_config(), tx);

            session.start("task-7").await;
            let events = collect_until_done(rx, 2000).await;
            let messages = log_messages(&events);

            assert!(matches!(events.last(), Some(SessionEvent::Done)));
            assert!(messages.contains(&"Audit task started".to_string()));
            assert!(messages.contains(&"Scan started".to_string()));
            assert!(messages.contains(&"Branch: main".to_string()));
            assert!(messages.contains(&"Scanned 5/10 files (50%) [+5]".to_string()));
            assert!(messages.contains(&"Scan complete".to_string()));
            assert!(messages.contains(&"  critical: 1".to_string()));
            assert!(messages.contains(&"  high: 1".to_string()));
            assert!(messages.contains(&"Quality score: 91.2/100".to_string()));
            assert!(messages.contains(&"Task finished".to_string()));
            assert!(!messages.iter().any(|m| m.starts_with("Elapsed")));
            assert_eq!(session.status().await, TaskStatus::Completed);
        }

        /// Tests that the Completed summary fires once even though the
        /// store keeps answering Completed through the sticky script
        /// tail.
        #[tokio::test]
        async fn completed_summary_fires_once() {
            let source = Arc::new(ScriptedSource::new(vec![
                snapshot(TaskStatus::Running, 5, 0, 0),
                snapshot(TaskStatus::Completed, 10, 0, 0),
                snapshot(TaskStatus::Completed, 10, 0, 0),
            ]));
            let (tx, rx) = mpsc::channel(256);
            let mut session = PollingSession::new(source, fast_config(), tx);

            session.start("task-7").await;
            let events = collect_until_done(rx, 2000).await;
            let completes = log_messages(&events)
                .iter()
                .filter(|m| m.as_str() == "Scan complete")
                .count();

            assert_eq!(completes, 1);
        }

        /// Tests that a failing issue fetch omits the histogram but still
        /// completes the summary.
        #[tokio::test]
        async fn issue_fetch_failure_degrades_silently() {
            let source = Arc::new(
                ScriptedSource::new(vec![snapshot(TaskStatus::Completed, 10, 3, 100)])
                    .failing_issue_fetch(),
            );
            let (tx, rx) = mpsc::channel(256);
            let mut session = PollingSession::new(source, fast_config(), tx);

            session.start("task-7").await;
            let events = collect_until_done(rx, 2000).await;
            let messages = log_messages(&events);

            assert!(messages.contains(&"Scan complete".to_string()));
            assert!(messages.contains(&"Task finished".to_string()));
            assert!(!messages.iter().any(|m| m.starts_with("  ")));
        }

        /// Tests that a fetch failure logs one error and polling
        /// continues (not-found is transient: the task may simply not be
        /// visible to the store yet).
        #[tokio::test]
        async fn fetch_failure_is_transient() {
            let source = Arc::new(ScriptedSource::new(Vec::new()));
            let (tx, rx) = mpsc::channel(256);
            let mut session = PollingSession::new(source.clone(), fast_config(), tx);

            session.start("ghost").await;
            tokio::time::sleep(Duration::from_millis(60)).await;
            session.teardown();
            drop(session);
            let events = collect_until_done(rx, 100).await;

            let failures = log_messages(&events)
                .iter()
                .filter(|m| m.starts_with("Status fetch failed"))
                .count();
            assert!(failures >= 2, "expected repeated transient failures, got {failures}");
            assert!(source.polls_served() >= 2);
        }

        /// Tests the Failed path: the correlator runs once and the session
        /// stops.
        #[tokio::test]
        async fn failed_flow_runs_correlator() {
            let source = Arc::new(
                ScriptedSource::new(vec![
                    snapshot(TaskStatus::Running, 5, 0, 0),
                    snapshot(TaskStatus::Failed, 5, 0, 0),
                ])
                .with_error_logs(vec![AppLogRecord {
                    timestamp: Utc::now(),
                    level: LogLevel::Error,
                    message: "audit backend returned 502".to_string(),
                    nested: None,
                }]),
            );
            let (tx, rx) = mpsc::channel(256);
            let mut session = PollingSession::new(source, fast_config(), tx);

            session.start("task-7").await;
            let events = collect_until_done(rx, 2000).await;
            let messages = log_messages(&events);

            assert!(messages.contains(&"Audit failed".to_string()));
            assert!(messages.contains(&"audit backend returned 502".to_string()));
            assert_eq!(session.status().await, TaskStatus::Failed);
        }

        /// Tests that a remotely cancelled task gets the cancelled summary
        /// through the poll.
        #[tokio::test]
        async fn remote_cancellation_summarizes() {
            let source = Arc::new(ScriptedSource::new(vec![
                snapshot(TaskStatus::Running, 4, 1, 120),
                snapshot(TaskStatus::Cancelled, 4, 1, 120),
            ]));
            let (tx, rx) = mpsc::channel(256);
            let mut session = PollingSession::new(source, fast_config(), tx);

            session.start("task-7").await;
            let events = collect_until_done(rx, 2000).await;
            let messages = log_messages(&events);

            assert!(messages.contains(&"Task cancelled by user".to_string()));
            assert!(messages.contains(&"• Files scanned: 4/10".to_string()));
        }
    }

    mod cancellation {
        use super::*;

        /// Tests that after a local cancel no further Running progress is
        /// logged and the cancelled summary fires once.
        #[tokio::test]
        async fn local_cancel_stops_progress_logging() {
            let source = Arc::new(ScriptedSource::new(vec![
                snapshot(TaskStatus::Running, 1, 0, 0),
                snapshot(TaskStatus::Running, 2, 0, 0),
                snapshot(TaskStatus::Running, 3, 0, 0),
                snapshot(TaskStatus::Running, 4, 0, 0),
                snapshot(TaskStatus::Running, 5, 0, 0),
            ]));
            let (tx, rx) = mpsc::channel(256);
            let mut session = PollingSession::new(source.clone(), fast_config(), tx);

            session.start("task-7").await;
            tokio::time::sleep(Duration::from_millis(25)).await;
            session.cancel().await;
            let events = collect_until_done(rx, 2000).await;
            let messages = log_messages(&events);

            let cancel_at = messages
                .iter()
                .position(|m| m == "Cancel requested by user");
            assert!(cancel_at.is_some());
            let after = &messages[cancel_at.unwrap_or(0) + 1..];
            assert!(!after.iter().any(|m| m.starts_with("Scanned")));

            let summaries = messages
                .iter()
                .filter(|m| m.as_str() == "Task cancelled by user")
                .count();
            assert_eq!(summaries, 1);
            assert_eq!(session.status().await, TaskStatus::Cancelled);
            assert_eq!(
                source.recorded_updates(),
                vec![("task-7".to_string(), TaskStatus::Cancelled)]
            );
        }

        /// Tests that a failed cancellation write degrades to a warning
        /// and never rolls back the local state.
        #[tokio::test]
        async fn persistence_failure_is_a_soft_warning() {
            let source = Arc::new(
                ScriptedSource::new(vec![snapshot(TaskStatus::Running, 1, 0, 0)])
                    .failing_status_update(),
            );
            let (tx, rx) = mpsc::channel(256);
            let mut session = PollingSession::new(source, fast_config(), tx);

            session.start("task-7").await;
            session.cancel().await;
            let events = collect_until_done(rx, 2000).await;
            let messages = log_messages(&events);

            assert!(
                messages
                    .iter()
                    .any(|m| m.starts_with("Failed to persist cancellation"))
            );
            assert_eq!(session.status().await, TaskStatus::Cancelled);
        }

        /// Tests that a second cancel is a no-op.
        #[tokio::test]
        async fn cancel_is_idempotent() {
            let source = Arc::new(ScriptedSource::new(vec![snapshot(
                TaskStatus::Running,
                1,
                0,
                0,
            )]));
            let (tx, rx) = mpsc::channel(256);
            let mut session = PollingSession::new(source, fast_config(), tx);

            session.start("task-7").await;
            session.cancel().await;
            session.cancel().await;
            let events = collect_until_done(rx, 2000).await;

            let summaries = log_messages(&events)
                .iter()
                .filter(|m| m.as_str() == "Task cancelled by user")
                .count();
            assert_eq!(summaries, 1);
        }

        /// Tests that cancel without an active session is a no-op.
        #[tokio::test]
        async fn cancel_without_session_is_a_no_op() {
            let source = Arc::new(ScriptedSource::new(Vec::new()));
            let (tx, rx) = mpsc::channel(8);
            let session = PollingSession::new(source, fast_config(), tx);

            session.cancel().await;
            drop(session);
            let events = collect_until_done(rx, 50).await;
            assert!(events.is_empty());
        }
    }

    mod teardown {
        use super::*;

        /// Tests that teardown stops polling and is idempotent.
        #[tokio::test]
        async fn teardown_is_idempotent() {
            let source = Arc::new(ScriptedSource::new(vec![snapshot(
                TaskStatus::Running,
                1,
                0,
                0,
            )]));
            let (tx, _rx) = mpsc::channel(256);
            let mut session = PollingSession::new(source.clone(), fast_config(), tx);

            session.start("task-7").await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            session.teardown();
            session.teardown();
            assert!(!session.is_active());

            let served = source.polls_served();
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert_eq!(source.polls_served(), served);
        }

        /// Tests that an idle controller reports empty read models.
        #[tokio::test]
        async fn idle_controller_reads_are_empty() {
            let source = Arc::new(ScriptedSource::new(Vec::new()));
            let (tx, _rx) = mpsc::channel(8);
            let session = PollingSession::new(source, fast_config(), tx);

            assert!(session.logs().await.is_empty());
            assert_eq!(session.status().await, TaskStatus::Pending);
            assert_eq!(session.task_id(), None);
        }
    }
}
