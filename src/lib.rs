//! `AuditWatch` - task-progress reconciliation for code-audit tasks
//!
//! Polls a snapshot store, diffs successive task snapshots and synthesizes
//! an append-only activity log a progress view can render verbatim.

pub mod cli;
pub mod config;
pub mod engine;
pub mod store;
