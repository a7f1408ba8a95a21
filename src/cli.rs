//! CLI argument parsing and scenario loading for the replay binary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::engine::snapshot::TaskSnapshot;
use crate::store::{AppLogRecord, IssueRecord, ScriptedSource};

/// `AuditWatch` - task-progress replay
///
/// Replays a recorded sequence of task snapshots through the
/// reconciliation engine and prints the synthesized log to stdout.
#[derive(Parser, Debug)]
#[command(name = "auditwatch", version, about, long_about = None)]
pub struct Args {
    /// Path to the scenario JSON file to replay
    pub scenario_file: PathBuf,

    /// Override the task id recorded in the scenario
    #[arg(long)]
    pub task_id: Option<String>,

    /// Poll interval in milliseconds (defaults to the engine config)
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Path to an engine config file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// A recorded scenario: the snapshot script plus the secondary records
/// the engine may fetch after a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Task id the snapshots belong to.
    pub task_id: String,
    /// Snapshot script, served one per poll; the last entry is sticky.
    pub snapshots: Vec<TaskSnapshot>,
    /// Issue list served after completion.
    #[serde(default)]
    pub issues: Vec<IssueRecord>,
    /// Application error logs served to the failure correlator.
    #[serde(default)]
    pub error_logs: Vec<AppLogRecord>,
}

impl Scenario {
    /// Builds the scripted store this scenario describes.
    #[must_use]
    pub fn into_source(self) -> ScriptedSource {
        ScriptedSource::new(self.snapshots)
            .with_issues(self.issues)
            .with_error_logs(self.error_logs)
    }
}

/// Loads a scenario file, failing with context on read or parse errors.
pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse scenario file: {}", path.display()))
}
