// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recent-CPU ranking for the runtime-profiler process cap.
//!
//! The tracker keeps the previous cycle's jiffies per PID and ranks by
//! delta, so "recent" means "since the last snapshot". A PID seen for the
//! first time ranks by its total, which biases toward long-running busy
//! processes on the first cycle; that is acceptable for a pre-filter.

use std::collections::HashMap;

use strobe_core::Pid;

#[derive(Debug, Default)]
pub struct CpuTracker {
    last: HashMap<Pid, u64>,
}

impl CpuTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rank `current` (pid → cumulative jiffies) by CPU spent since the
    /// previous call, busiest first. Updates the stored snapshot and drops
    /// PIDs that vanished.
    pub fn rank(&mut self, current: &HashMap<Pid, u64>) -> Vec<Pid> {
        let mut ranked: Vec<(Pid, u64)> = current
            .iter()
            .map(|(pid, jiffies)| {
                let prev = self.last.get(pid).copied().unwrap_or(0);
                (*pid, jiffies.saturating_sub(prev))
            })
            .collect();
        // Deterministic order for equal deltas.
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        self.last = current.clone();
        ranked.into_iter().map(|(pid, _)| pid).collect()
    }
}

#[cfg(test)]
#[path = "cpu_tests.rs"]
mod tests;
