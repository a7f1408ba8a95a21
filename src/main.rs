//! `AuditWatch` - task-progress replay
//!
//! Entry point for the replay binary: feeds a recorded scenario through
//! the reconciliation engine and prints the synthesized log.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;

use auditwatch::cli::{Args, load_scenario};
use auditwatch::config::{EngineConfig, load_config};
use auditwatch::engine::log::{LogEvent, LogKind};
use auditwatch::engine::session::{PollingSession, SessionEvent};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    if let Some(interval_ms) = args.interval_ms {
        config.poll_interval_ms = interval_ms;
    }
    config = config.normalized();

    let scenario = load_scenario(&args.scenario_file)?;
    let task_id = args
        .task_id
        .clone()
        .unwrap_or_else(|| scenario.task_id.clone());
    let source = Arc::new(scenario.into_source());

    let (events_tx, mut events_rx) = mpsc::channel(256);
    let mut session = PollingSession::new(source, config, events_tx);
    session.start(&task_id).await;

    while let Some(event) = events_rx.recv().await {
        match event {
            SessionEvent::Log(log) => print_log(&log),
            SessionEvent::StatusChanged(status) => {
                eprintln!("status: {}", status.name());
            }
            SessionEvent::Done => break,
        }
    }

    session.teardown();
    Ok(())
}

/// Renders one log event with the severity glyphs the progress view uses.
fn print_log(event: &LogEvent) {
    if event.message.is_empty() {
        println!();
        return;
    }
    match event.kind {
        LogKind::Info => println!("  {}", event.message),
        LogKind::Success => println!("+ {}", event.message),
        LogKind::Warning => println!("! {}", event.message),
        LogKind::Error => println!("✗ {}", event.message),
    }
}
