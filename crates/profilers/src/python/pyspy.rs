// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Attach-based Python profiling via py-spy.

use std::path::Path;
use std::sync::Arc;

use strobe_core::{FrameSuffix, Pid, ProcessRecord, ProfilingError, StackTable};
use strobe_supervise::{CommandSpec, Supervisor};

use crate::driver::{self, DriverConfig};

pub(super) fn command(cfg: &DriverConfig, pid: Pid, out_path: &Path) -> CommandSpec {
    CommandSpec::new("py-spy")
        .arg("record")
        .arg("-p")
        .arg(pid.to_string())
        .arg("-r")
        .arg(cfg.frequency.to_string())
        .arg("-d")
        .arg(cfg.duration.as_secs().to_string())
        .arg("--format")
        .arg("raw")
        .arg("--nonblocking")
        .arg("-o")
        .arg(out_path.display().to_string())
}

/// Fan out py-spy over the selected targets. Frames come back untagged and
/// get the Python suffix applied.
pub(super) async fn profile(
    supervisor: &Supervisor,
    cfg: &DriverConfig,
    targets: Vec<ProcessRecord>,
) -> Result<StackTable, ProfilingError> {
    let out_dir = tempfile::tempdir().map_err(|e| ProfilingError::SpawnFailed {
        program: "py-spy".to_string(),
        reason: format!("cannot create output dir: {e}"),
    })?;
    let out_dir = Arc::new(out_dir);

    let supervisor = supervisor.clone();
    let cfg = cfg.clone();
    let workers = cfg.max_workers;
    driver::fan_out(targets, workers, move |record| {
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
                FrameSuffix::Python,
            )
            .await
        }
    })
    .await
}

#[cfg(test)]
#[path = "pyspy_tests.rs"]
mod tests;
