// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Post-snapshot resource reclamation.
//!
//! Runs after every cycle and after every stop: sweeps completed children
//! out of the supervisor live-set (closing their parent-side pipes),
//! trims the command history, and emits one structured reclaim event.
//! Unreaped pipe fds are the classic slow leak on busy hosts; this sweep
//! is the path that keeps steady-state fd count flat.

use std::fs;

use tracing::info;

use strobe_supervise::{ReapStats, Supervisor};

use crate::history::CommandHistory;

/// Counters from one reclamation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub reap: ReapStats,
    pub history_evicted: usize,
    pub rss_mb: u64,
    pub open_fds: usize,
}

#[derive(Debug, Clone)]
pub struct MemoryManager {
    supervisor: Supervisor,
    /// Trigger an extra sweep above this resident set size; 0 disables.
    high_water_mb: u64,
}

impl MemoryManager {
    pub fn new(supervisor: Supervisor, high_water_mb: u64) -> Self {
        Self {
            supervisor,
            high_water_mb,
        }
    }

    /// Sweep completed subprocesses and trim bounded state.
    pub fn sweep(&self, history: Option<&mut CommandHistory>) -> ReclaimReport {
        let reap = self.supervisor.reap_completed();
        let history_evicted = history.map(|h| h.trim()).unwrap_or(0);
        let report = ReclaimReport {
            reap,
            history_evicted,
            rss_mb: own_rss_mb().unwrap_or(0),
            open_fds: open_fd_count(),
        };
        info!(
            scanned = report.reap.scanned,
            reaped = report.reap.reaped,
            pipes_closed = report.reap.pipes_closed,
            history_evicted = report.history_evicted,
            rss_mb = report.rss_mb,
            open_fds = report.open_fds,
            "resource reclamation"
        );
        report
    }

    /// Whether the agent's own resident set crossed the high-water mark.
    pub fn over_high_water(&self) -> bool {
        if self.high_water_mb == 0 {
            return false;
        }
        own_rss_mb().is_some_and(|rss| rss > self.high_water_mb)
    }
}

fn own_rss_mb() -> Option<u64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    let kb: u64 = status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))?
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .ok()?;
    Some(kb / 1024)
}

fn open_fd_count() -> usize {
    fs::read_dir("/proc/self/fd")
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
