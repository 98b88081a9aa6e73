// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/proc/<pid>/stat` and `/proc/stat` parsing.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::unistd::{sysconf, SysconfVar};

/// The fields of `/proc/<pid>/stat` the agent needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRecord {
    pub pid: i32,
    pub comm: String,
    pub state: char,
    /// User-mode CPU time in clock ticks.
    pub utime: u64,
    /// Kernel-mode CPU time in clock ticks.
    pub stime: u64,
    /// Process start, in clock ticks after boot.
    pub starttime: u64,
}

impl StatRecord {
    pub fn total_jiffies(&self) -> u64 {
        self.utime + self.stime
    }
}

/// Parse one `/proc/<pid>/stat` line.
///
/// `comm` is delimited by parentheses and may itself contain spaces and
/// parentheses, so the comm field ends at the **last** `)` in the line.
pub fn parse_stat(line: &str) -> Option<StatRecord> {
    let open = line.find('(')?;
    let close = line.rfind(')')?;
    let pid: i32 = line[..open].trim().parse().ok()?;
    let comm = line[open + 1..close].to_string();

    // Fields after comm, 0-indexed: state, ppid, …, utime(11), stime(12),
    // …, starttime(19).
    let rest: Vec<&str> = line[close + 1..].split_whitespace().collect();
    let state = rest.first()?.chars().next()?;
    let utime: u64 = rest.get(11)?.parse().ok()?;
    let stime: u64 = rest.get(12)?.parse().ok()?;
    let starttime: u64 = rest.get(19)?.parse().ok()?;

    Some(StatRecord {
        pid,
        comm,
        state,
        utime,
        stime,
        starttime,
    })
}

/// Extract the boot time (`btime`, seconds since the epoch) from
/// `/proc/stat` content.
pub fn parse_btime(proc_stat: &str) -> Option<u64> {
    proc_stat
        .lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|rest| rest.trim().parse().ok())
}

/// Clock ticks per second (`USER_HZ`), falling back to the universal 100.
pub fn clock_ticks_per_sec() -> u64 {
    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(hz)) if hz > 0 => hz as u64,
        _ => 100,
    }
}

/// Wall-clock process start time from boot time plus start ticks.
pub fn create_time(btime_secs: u64, starttime_ticks: u64, hz: u64) -> SystemTime {
    let since_boot = Duration::from_millis(starttime_ticks.saturating_mul(1000) / hz.max(1));
    UNIX_EPOCH + Duration::from_secs(btime_secs) + since_boot
}

#[cfg(test)]
#[path = "stat_tests.rs"]
mod tests;
