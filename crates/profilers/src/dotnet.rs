// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! .NET driver: per-process collection via dotnet-trace.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use strobe_core::{FrameSuffix, Pid, ProfilingError, RuntimeKind, StackTable};
use strobe_supervise::{CommandSpec, Supervisor};

use crate::driver::{self, CycleContext, DriverConfig};

/// dotnet-trace takes its duration as `hh:mm:ss`.
fn format_hms(duration: Duration) -> String {
    let total = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

fn command(cfg: &DriverConfig, pid: Pid, out_path: &Path) -> CommandSpec {
    CommandSpec::new("dotnet-trace")
        .arg("collect")
        .arg("-p")
        .arg(pid.to_string())
        .arg("--duration")
        .arg(format_hms(cfg.duration))
        .arg("--format")
        .arg("collapsed")
        .arg("-o")
        .arg(out_path.display().to_string())
}

pub struct DotNetDriver {
    cfg: DriverConfig,
    supervisor: Supervisor,
}

impl DotNetDriver {
    pub fn new(cfg: DriverConfig, supervisor: Supervisor) -> Self {
        Self { cfg, supervisor }
    }

    pub async fn snapshot(&mut self, ctx: &CycleContext) -> Result<StackTable, ProfilingError> {
        let targets: Vec<_> = driver::select(ctx, RuntimeKind::DotNet, &self.cfg)
            .into_iter()
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(StackTable::new());
        }
        debug!(targets = targets.len(), "profiling .NET processes");

        let out_dir = tempfile::tempdir().map_err(|e| ProfilingError::SpawnFailed {
            program: "dotnet-trace".to_string(),
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
                    FrameSuffix::DotNet,
                )
                .await
            }
        })
        .await
    }
}

#[cfg(test)]
#[path = "dotnet_tests.rs"]
mod tests;
