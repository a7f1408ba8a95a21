//! Engine configuration.
//!
//! Tuning knobs for the reconciliation engine, persisted as JSON so a
//! deployment can slow the poll rate or widen the correlation window
//! without a rebuild. Invalid values are replaced with defaults on load.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default fixed polling interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default time range searched for related error logs after a failure.
pub const DEFAULT_CORRELATION_WINDOW_SECS: i64 = 60;

/// Default cap on correlated error records shown in a Failed summary.
pub const DEFAULT_MAX_CORRELATED_ENTRIES: usize = 3;

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Fixed interval between snapshot polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// How far back to search the application log on failure, in seconds.
    pub correlation_window_secs: i64,
    /// Most recent correlated records kept for the Failed summary.
    pub max_correlated_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            correlation_window_secs: DEFAULT_CORRELATION_WINDOW_SECS,
            max_correlated_entries: DEFAULT_MAX_CORRELATED_ENTRIES,
        }
    }
}

impl EngineConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Replaces out-of-range values with defaults. A zero interval would
    /// turn the timer into a busy loop; a non-positive window would never
    /// match a record.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.poll_interval_ms == 0 {
            self.poll_interval_ms = DEFAULT_POLL_INTERVAL_MS;
        }
        if self.correlation_window_secs <= 0 {
            self.correlation_window_secs = DEFAULT_CORRELATION_WINDOW_SECS;
        }
        self
    }
}

/// Loads engine configuration from the given JSON file.
///
/// Returns defaults when the file does not exist; out-of-range values are
/// normalized.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(path).context("Failed to read config file")?;
    let config: EngineConfig =
        serde_json::from_str(&content).context("Failed to parse config file")?;
    Ok(config.normalized())
}

/// Saves engine configuration to the given path as pretty-printed JSON.
/// The parent directory must exist.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_config(path: &Path, config: &EngineConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, json).context("Failed to write config file")
}
