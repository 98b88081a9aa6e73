// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Immutable per-cycle description of a host process.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::runtime::RuntimeKind;

/// OS process identifier.
pub type Pid = i32;

/// One process as observed during enumeration.
///
/// Created during the scan, immutable for the rest of the cycle, discarded
/// at cycle end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: Pid,
    /// Short command name from `/proc/<pid>/stat` (may contain spaces).
    pub comm: String,
    /// Resolved `/proc/<pid>/exe` target; empty when unreadable.
    pub exe_path: PathBuf,
    /// NUL-split command line; empty for kernel threads.
    pub cmdline: Vec<String>,
    /// Wall-clock process start time.
    pub create_time: SystemTime,
    pub runtime: RuntimeKind,
    /// Short container id when the process runs inside one.
    pub container_id: Option<String>,
    /// Application identifier derived from the command line, when enabled.
    pub app_id: Option<String>,
}

impl ProcessRecord {
    /// Age of the process at `now`; zero if the clock went backwards.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.create_time).unwrap_or_default()
    }
}
