// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Java driver: per-process attach via the async-profiler launcher.
//!
//! The JVM agent emits collapsed stacks with its own tier tags
//! (`_[j]`, `_[i]`, `_[0]`, `_[1]`); they pass through untouched.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use strobe_core::{FrameSuffix, Pid, ProfilingError, RuntimeKind, StackTable};
use strobe_supervise::{CommandSpec, Supervisor};

use crate::driver::{self, CycleContext, DriverConfig};

/// Whether Java profiling runs at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JavaMode {
    /// Attach async-profiler to each JVM.
    Ap,
    Disabled,
}

/// Floor for the sampling interval the agent accepts.
const MIN_INTERVAL_NS: u64 = 1_000_000;

/// Sampling interval in nanoseconds for a frequency in Hz, floored at 1ms.
pub fn interval_ns(frequency: u32) -> u64 {
    (1_000_000_000 / u64::from(frequency.max(1))).max(MIN_INTERVAL_NS)
}

fn command(program: &str, cfg: &DriverConfig, pid: Pid, out_path: &Path) -> CommandSpec {
    CommandSpec::new(program)
        .arg("-d")
        .arg(cfg.duration.as_secs().to_string())
        .arg("-i")
        .arg(interval_ns(cfg.frequency).to_string())
        .arg("-o")
        .arg("collapsed")
        .arg("-f")
        .arg(out_path.display().to_string())
        .arg(pid.to_string())
}

pub struct JavaDriver {
    cfg: DriverConfig,
    mode: JavaMode,
    program: String,
    supervisor: Supervisor,
}

impl JavaDriver {
    pub fn new(cfg: DriverConfig, mode: JavaMode, supervisor: Supervisor) -> Self {
        Self {
            cfg,
            mode,
            program: "asprof".to_string(),
            supervisor,
        }
    }

    pub async fn snapshot(&mut self, ctx: &CycleContext) -> Result<StackTable, ProfilingError> {
        if self.mode == JavaMode::Disabled {
            return Ok(StackTable::new());
        }
        let targets: Vec<_> = driver::select(ctx, RuntimeKind::Java, &self.cfg)
            .into_iter()
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(StackTable::new());
        }
        debug!(targets = targets.len(), "profiling JVMs");

        let out_dir = tempfile::tempdir().map_err(|e| ProfilingError::SpawnFailed {
            program: self.program.clone(),
            reason: format!("cannot create output dir: {e}"),
        })?;
        let out_dir = Arc::new(out_dir);

        let supervisor = self.supervisor.clone();
        let cfg = self.cfg.clone();
        let program = self.program.clone();
        driver::fan_out(targets, self.cfg.max_workers, move |record| {
            let supervisor = supervisor.clone();
            let cfg = cfg.clone();
            let program = program.clone();
            let out_dir = Arc::clone(&out_dir);
            async move {
                let pid = record.pid;
                let out = out_dir.path().join(format!("{pid}.collapsed"));
                let spec = command(&program, &cfg, pid, &out);
                driver::run_and_parse_file(
                    &supervisor,
                    spec,
                    cfg.child_timeout(),
                    pid,
                    &out,
                    FrameSuffix::None,
                )
                .await
            }
        })
        .await
    }
}

#[cfg(test)]
#[path = "java_tests.rs"]
mod tests;
