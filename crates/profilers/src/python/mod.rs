// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Python driver: composite of an eBPF system-wide collector (PyPerf) and
//! an attach-based per-process profiler (py-spy).
//!
//! Exactly one of the two runs in any snapshot. The eBPF path covers all
//! Python processes in one session and is preferred when the host
//! supports it; it is skipped for the cycle when the Python process count
//! exceeds the configured cap, and permanently (in `auto` mode) once its
//! initialization fails.

mod pyperf;
mod pyspy;

use tracing::{debug, warn};

use strobe_core::{ProfilingError, RuntimeKind, StackTable};
use strobe_supervise::Supervisor;

use crate::driver::{self, CycleContext, DriverConfig};

/// Python profiler selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PythonMode {
    /// Prefer eBPF, fall back to attach-based when it cannot run.
    Auto,
    /// eBPF only; its unavailability fails the driver.
    PyPerf,
    /// Attach-based only.
    PySpy,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EbpfDecision {
    Run,
    /// Too many targets this cycle; attach-based takes over temporarily.
    SkipThisCycle,
    /// The host (or an earlier failure) rules eBPF out for good.
    Unavailable,
}

pub struct PythonDriver {
    cfg: DriverConfig,
    mode: PythonMode,
    /// Skip the eBPF collector for the cycle when more Python processes
    /// than this are running; 0 disables the cap.
    skip_above: usize,
    supervisor: Supervisor,
    /// Set once eBPF init fails in `auto` mode; never retried.
    ebpf_broken: bool,
}

impl PythonDriver {
    pub fn new(
        cfg: DriverConfig,
        mode: PythonMode,
        skip_above: usize,
        supervisor: Supervisor,
    ) -> Self {
        Self {
            cfg,
            mode,
            skip_above,
            supervisor,
            ebpf_broken: false,
        }
    }

    fn ebpf_decision(&self, python_count: usize) -> EbpfDecision {
        if !matches!(self.mode, PythonMode::Auto | PythonMode::PyPerf) {
            return EbpfDecision::Unavailable;
        }
        if std::env::consts::ARCH != "x86_64" {
            debug!(arch = std::env::consts::ARCH, "eBPF collector requires x86_64");
            return EbpfDecision::Unavailable;
        }
        if self.ebpf_broken {
            return EbpfDecision::Unavailable;
        }
        if self.skip_above > 0 && python_count > self.skip_above {
            debug!(
                python_count,
                cap = self.skip_above,
                "too many python processes for the eBPF collector this cycle"
            );
            return EbpfDecision::SkipThisCycle;
        }
        EbpfDecision::Run
    }

    pub async fn snapshot(&mut self, ctx: &CycleContext) -> Result<StackTable, ProfilingError> {
        if self.mode == PythonMode::Disabled {
            return Ok(StackTable::new());
        }

        let python_count = ctx
            .records
            .iter()
            .filter(|r| r.runtime == RuntimeKind::Python)
            .count();
        if python_count == 0 {
            return Ok(StackTable::new());
        }

        match self.ebpf_decision(python_count) {
            EbpfDecision::Run => {
                match pyperf::profile_all(&self.supervisor, &self.cfg).await {
                    Ok(mut table) => {
                        // Post-filter: the collector saw every Python
                        // process, including ones the age filter excludes.
                        let eligible: std::collections::HashSet<_> =
                            driver::select(ctx, RuntimeKind::Python, &self.cfg)
                                .iter()
                                .map(|r| r.pid)
                                .collect();
                        table.retain_pids(|pid| eligible.contains(&pid));
                        return Ok(table);
                    }
                    Err(e) if self.mode == PythonMode::Auto => {
                        warn!(error = %e, "eBPF collector failed, falling back to attach-based profiling");
                        self.ebpf_broken = true;
                    }
                    Err(e) => return Err(e),
                }
            }
            EbpfDecision::SkipThisCycle => {}
            EbpfDecision::Unavailable => {
                if self.mode == PythonMode::PyPerf {
                    return Err(ProfilingError::ConfigInvalid(
                        "eBPF python profiling requested but unavailable on this host".to_string(),
                    ));
                }
            }
        }

        let targets: Vec<_> = driver::select(ctx, RuntimeKind::Python, &self.cfg)
            .into_iter()
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(StackTable::new());
        }
        debug!(targets = targets.len(), "attach-profiling python processes");
        pyspy::profile(&self.supervisor, &self.cfg, targets).await
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
