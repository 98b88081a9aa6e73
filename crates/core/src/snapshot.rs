// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-cycle result and telemetry records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{CycleId, RunId};
use crate::stack::StackTable;

/// Everything one snapshot cycle collected, before merging.
///
/// Transferred by move: scheduler → merger → uploader, then explicitly
/// dropped before resource reclamation runs.
#[derive(Debug)]
pub struct SnapshotResult {
    pub cycle: CycleId,
    pub run: RunId,
    pub wall_start: DateTime<Utc>,
    pub wall_end: DateTime<Utc>,
    /// One table per runtime driver that produced output this cycle.
    pub runtime_tables: Vec<StackTable>,
    /// The system profiler's table, absent when perf is disabled or gated.
    pub system_table: Option<StackTable>,
}

/// Outcome of one driver in one cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriverStatus {
    Ok,
    Skipped { reason: String },
    Failed { error: String },
}

/// One telemetry record, emitted per driver per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleTelemetry {
    pub cycle: u64,
    pub driver: String,
    #[serde(flatten)]
    pub status: DriverStatus,
    pub duration_ms: u64,
    pub samples_emitted: u64,
}
