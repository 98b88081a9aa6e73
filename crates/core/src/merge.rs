// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Merging runtime and system stack tables into one collapsed profile.
//!
//! For a PID covered by a runtime profiler, the runtime stacks are
//! authoritative but their sample volume is rescaled to the system
//! profiler's CPU weight for that PID, so per-language profiles stay
//! comparable across runtimes within a cycle. PIDs only the system
//! profiler saw are emitted verbatim.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::id::{CycleId, RunId};
use crate::process::Pid;
use crate::stack::{PidSamples, StackTable};

/// Index of the fallback metadata entry used for PIDs enumeration never saw.
pub const UNKNOWN_META_IDX: usize = 0;

/// Per-PID output identity: the fixed fields prefixed to every stack line.
#[derive(Debug, Clone, Default)]
pub struct ProcessIdentity {
    pub comm: String,
    /// Short container id, empty when not containerized.
    pub container: String,
    /// Application identifier, empty when disabled or not derivable.
    pub app_id: String,
    /// Index into [`MergeContext::metadata`].
    pub meta_idx: usize,
}

/// Inputs the merger needs besides the tables themselves.
#[derive(Debug, Clone)]
pub struct MergeContext {
    pub run: RunId,
    pub cycle: CycleId,
    pub agent_version: String,
    pub hostname: String,
    pub wall_start: DateTime<Utc>,
    pub wall_end: DateTime<Utc>,
    /// Application metadata array; index 0 is reserved for "unknown".
    pub metadata: Vec<serde_json::Value>,
    pub identities: HashMap<Pid, ProcessIdentity>,
}

impl MergeContext {
    /// A context with an empty metadata index (entry 0 pre-seeded).
    pub fn new(
        run: RunId,
        cycle: CycleId,
        agent_version: impl Into<String>,
        hostname: impl Into<String>,
        wall_start: DateTime<Utc>,
        wall_end: DateTime<Utc>,
    ) -> Self {
        Self {
            run,
            cycle,
            agent_version: agent_version.into(),
            hostname: hostname.into(),
            wall_start,
            wall_end,
            metadata: vec![serde_json::Value::Null],
            identities: HashMap::new(),
        }
    }

    /// Append a metadata entry, returning its index.
    pub fn push_metadata(&mut self, entry: serde_json::Value) -> usize {
        self.metadata.push(entry);
        self.metadata.len() - 1
    }

    fn line_prefix(&self, pid: Pid, observed_comm: Option<&str>) -> String {
        match self.identities.get(&pid) {
            Some(id) => format!("{};{};{};{};", id.meta_idx, id.container, id.comm, id.app_id),
            None => format!(
                "{};;{};;",
                UNKNOWN_META_IDX,
                observed_comm.unwrap_or("unknown")
            ),
        }
    }
}

/// Counters describing one merge, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub lines: usize,
    /// Runtime PIDs rescaled against system weight.
    pub scaled_pids: usize,
    /// Runtime PIDs emitted unscaled (no system samples for them).
    pub unscaled_pids: usize,
    /// PIDs emitted verbatim from the system table.
    pub system_pids: usize,
    pub total_count: u64,
}

fn scale(samples: &PidSamples, ratio: Option<f64>) -> Vec<(String, u64)> {
    samples
        .iter()
        .map(|(stack, count)| {
            let scaled = match ratio {
                Some(r) => ((count as f64 * r).round() as u64).max(1),
                None => count,
            };
            (stack.render(), scaled)
        })
        .collect()
}

/// Produce the collapsed profile text: one `#`-prefixed JSON header line,
/// then sorted stack lines. An empty merge still yields the header so
/// downstream observers can tell "no data" from "no agent".
pub fn merge(
    runtime_tables: &[StackTable],
    system: Option<&StackTable>,
    ctx: &MergeContext,
) -> (String, MergeStats) {
    let mut stats = MergeStats::default();
    let mut lines: Vec<String> = Vec::new();
    let mut runtime_pids: HashSet<Pid> = HashSet::new();

    for table in runtime_tables {
        for (pid, samples) in table.iter() {
            if samples.is_empty() || !runtime_pids.insert(pid) {
                continue;
            }
            let system_total = system
                .and_then(|s| s.get(pid))
                .map(PidSamples::total)
                .unwrap_or(0);
            let runtime_total = samples.total();
            let ratio = if system_total > 0 && runtime_total > 0 {
                stats.scaled_pids += 1;
                Some(system_total as f64 / runtime_total as f64)
            } else {
                stats.unscaled_pids += 1;
                None
            };
            let prefix = ctx.line_prefix(pid, table.comm(pid));
            for (stack, count) in scale(samples, ratio) {
                stats.total_count += count;
                lines.push(format!("{prefix}{stack} {count}"));
            }
        }
    }

    if let Some(system) = system {
        for (pid, samples) in system.iter() {
            if runtime_pids.contains(&pid) || samples.is_empty() {
                continue;
            }
            stats.system_pids += 1;
            let prefix = ctx.line_prefix(pid, system.comm(pid));
            for (stack, count) in samples.iter() {
                stats.total_count += count;
                lines.push(format!("{}{} {}", prefix, stack.render(), count));
            }
        }
    }

    lines.sort_unstable();
    stats.lines = lines.len();

    let header = json!({
        "run_id": ctx.run.as_str(),
        "cycle_id": ctx.cycle.0,
        "agent_version": ctx.agent_version,
        "hostname": ctx.hostname,
        "start_wall": ctx.wall_start.to_rfc3339(),
        "end_wall": ctx.wall_end.to_rfc3339(),
        "application_metadata": ctx.metadata,
    });

    let mut out = format!("#{header}\n");
    for line in &lines {
        out.push_str(line);
        out.push('\n');
    }

    (out, stats)
}

#[cfg(test)]
#[path = "merge_tests.rs"]
mod tests;
