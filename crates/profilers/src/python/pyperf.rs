// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! System-wide Python profiling via the eBPF PyPerf collector.
//!
//! One session covers every Python process on the host; output lines lead
//! with `comm-pid` and carry `_[p]` / `_[pn]` tags emitted by the
//! collector itself.

use strobe_core::{parse_system_wide, ProfilingError, StackTable};
use strobe_supervise::{CommandSpec, Supervisor};

use crate::driver::DriverConfig;

pub(super) fn command(cfg: &DriverConfig, out_path: &std::path::Path) -> CommandSpec {
    CommandSpec::new("pyperf")
        .arg("--output")
        .arg(out_path.display().to_string())
        .arg("-F")
        .arg(cfg.frequency.to_string())
        .arg("-d")
        .arg(cfg.duration.as_secs().to_string())
}

pub(super) async fn profile_all(
    supervisor: &Supervisor,
    cfg: &DriverConfig,
) -> Result<StackTable, ProfilingError> {
    let out_dir = tempfile::tempdir().map_err(|e| ProfilingError::SpawnFailed {
        program: "pyperf".to_string(),
        reason: format!("cannot create output dir: {e}"),
    })?;
    let out_path = out_dir.path().join("pyperf.collapsed");

    let handle = supervisor.spawn(&command(cfg, &out_path))?;
    let finished = supervisor.wait_output(handle, cfg.child_timeout()).await?;
    if !finished.success() {
        return Err(ProfilingError::ChildCrashed {
            reason: format!(
                "pyperf exit {:?}: {}",
                finished.status.code(),
                finished.stderr_text().lines().next().unwrap_or("")
            ),
        });
    }

    let content = std::fs::read_to_string(&out_path)
        .map_err(|e| ProfilingError::Parse(format!("missing pyperf output: {e}")))?;
    let (table, tally) = parse_system_wide(&content);
    if tally.all_failed() {
        return Err(ProfilingError::Parse(format!(
            "all {} pyperf lines unparsable",
            tally.skipped
        )));
    }
    Ok(table)
}

#[cfg(test)]
#[path = "pyperf_tests.rs"]
mod tests;
