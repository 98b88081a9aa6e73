// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ruby driver: per-process attach via rbspy.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use strobe_core::{FrameSuffix, Pid, ProfilingError, RuntimeKind, StackTable};
use strobe_supervise::{CommandSpec, Supervisor};

use crate::driver::{self, CycleContext, DriverConfig};

fn command(cfg: &DriverConfig, pid: Pid, out_path: &Path) -> CommandSpec {
    CommandSpec::new("rbspy")
        .arg("record")
        .arg("--pid")
        .arg(pid.to_string())
        .arg("--rate")
        .arg(cfg.frequency.to_string())
        .arg("--duration")
        .arg(cfg.duration.as_secs().to_string())
        .arg("--format")
        .arg("collapsed")
        .arg("--file")
        .arg(out_path.display().to_string())
        .arg("--silent")
}

pub struct RubyDriver {
    cfg: DriverConfig,
    supervisor: Supervisor,
}

impl RubyDriver {
    pub fn new(cfg: DriverConfig, supervisor: Supervisor) -> Self {
        Self { cfg, supervisor }
    }

    pub async fn snapshot(&mut self, ctx: &CycleContext) -> Result<StackTable, ProfilingError> {
        let targets: Vec<_> = driver::select(ctx, RuntimeKind::Ruby, &self.cfg)
            .into_iter()
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(StackTable::new());
        }
        debug!(targets = targets.len(), "profiling ruby processes");

        let out_dir = tempfile::tempdir().map_err(|e| ProfilingError::SpawnFailed {
            program: "rbspy".to_string(),
            reason: format!("cannot create output dir: {e}"),
        })?;
        let out_dir = Arc::new(out_dir);

        let supervisor = self.supervisor.clone();
        let cfg = self.cfg.clone();
        driver::fan_out(targets, self.cfg.max_workers, move |record| {
            let supervisor = supervisor.clone();
            let cfg = cfg.clone();
            let out_dir = Arc::clone(&out_dir);
            async move {
                let pid = record.pid;
                let out = out_dir.path().join(format!("{pid}.collapsed"));
                let spec = command(&cfg, pid, &out);
                driver::run_and_parse_file(
                    &supervisor,
                    spec,
                    cfg.child_timeout(),
                    pid,
                    &out,
                    FrameSuffix::Ruby,
                )
                .await
            }
        })
        .await
    }
}

#[cfg(test)]
#[path = "ruby_tests.rs"]
mod tests;
