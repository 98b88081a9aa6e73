// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Contract shared by every runtime profiler driver: target selection,
//! bounded fan-out, and failure classification.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use strobe_core::{
    Pid, PidSamples, ProcessRecord, ProfilingError, RuntimeKind, Severity, StackTable,
};
use strobe_supervise::FinishedChild;

use crate::dotnet::DotNetDriver;
use crate::java::JavaDriver;
use crate::php::PhpDriver;
use crate::python::PythonDriver;
use crate::ruby::RubyDriver;

/// Grace added on top of the profiling duration for child timeouts.
pub const CHILD_GRACE: Duration = Duration::from_secs(10);

/// Settings every runtime driver shares.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Sampling frequency in Hz.
    pub frequency: u32,
    /// Profiling window per cycle.
    pub duration: Duration,
    /// Minimum target age; younger processes are skipped outright.
    pub min_profiling_duration: Duration,
    /// Cap on targets per driver per cycle; 0 means unlimited.
    pub max_processes: usize,
    /// Fan-out width for per-process profilers.
    pub max_workers: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            frequency: 11,
            duration: Duration::from_secs(60),
            min_profiling_duration: Duration::from_secs(10),
            max_processes: 50,
            max_workers: 10,
        }
    }
}

impl DriverConfig {
    /// Child wall-clock timeout: profiling window plus grace.
    pub fn child_timeout(&self) -> Duration {
        self.duration + CHILD_GRACE
    }
}

/// Per-cycle view handed to each driver's snapshot. Cheap to clone so
/// drivers can run as independent tasks.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub records: Arc<Vec<ProcessRecord>>,
    /// PIDs ordered busiest-first, for cap truncation.
    pub ranked: Arc<Vec<Pid>>,
    pub now: SystemTime,
}

impl CycleContext {
    pub fn new(records: Vec<ProcessRecord>, ranked: Vec<Pid>, now: SystemTime) -> Self {
        Self {
            records: Arc::new(records),
            ranked: Arc::new(ranked),
            now,
        }
    }
}

/// Pre-profiling target selection: runtime match, age filter, then cap
/// truncation by recent CPU. Truncation happens before any profiler
/// starts, never after.
pub fn select<'a>(
    ctx: &'a CycleContext,
    runtime: RuntimeKind,
    cfg: &DriverConfig,
) -> Vec<&'a ProcessRecord> {
    let mut matched: Vec<&ProcessRecord> = ctx
        .records
        .iter()
        .filter(|r| r.runtime == runtime)
        .filter(|r| {
            let old_enough = r.age(ctx.now) >= cfg.min_profiling_duration;
            if !old_enough {
                debug!(pid = r.pid, runtime = %runtime, "skipping short-lived process");
            }
            old_enough
        })
        .collect();

    if cfg.max_processes > 0 && matched.len() > cfg.max_processes {
        let rank_of = |pid: Pid| {
            ctx.ranked
                .iter()
                .position(|p| *p == pid)
                .unwrap_or(usize::MAX)
        };
        matched.sort_by_key(|r| rank_of(r.pid));
        debug!(
            runtime = %runtime,
            matched = matched.len(),
            cap = cfg.max_processes,
            "truncating to busiest targets"
        );
        matched.truncate(cfg.max_processes);
    }
    matched
}

/// Run `profile` over `targets` with at most `workers` children at once.
///
/// Benign failures are recorded as synthetic error stacks for their PID;
/// a session-level failure (spawn error, cancellation) aborts the whole
/// driver for this cycle.
pub async fn fan_out<F, Fut>(
    targets: Vec<ProcessRecord>,
    workers: usize,
    profile: F,
) -> Result<StackTable, ProfilingError>
where
    F: Fn(ProcessRecord) -> Fut,
    Fut: std::future::Future<Output = Result<PidSamples, ProfilingError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut join_set: JoinSet<(Pid, String, Result<PidSamples, ProfilingError>)> = JoinSet::new();

    for record in targets {
        let permit = Arc::clone(&semaphore);
        let pid = record.pid;
        let comm = record.comm.clone();
        let fut = profile(record);
        join_set.spawn(async move {
            let _permit = permit.acquire_owned().await;
            (pid, comm, fut.await)
        });
    }

    let mut table = StackTable::new();
    let mut session_error: Option<ProfilingError> = None;
    while let Some(joined) = join_set.join_next().await {
        let Ok((pid, comm, outcome)) = joined else {
            continue;
        };
        match outcome {
            Ok(samples) => {
                table.observe_comm(pid, comm);
                table.insert_pid(pid, samples);
            }
            Err(e) if e.keeps_pid() => {
                match e.severity() {
                    Severity::Debug => debug!(pid, error = %e, "target not profiled"),
                    Severity::Warn => warn!(pid, error = %e, "target not profiled"),
                }
                table.observe_comm(pid, comm);
                table.insert_pid(pid, PidSamples::error(e.label()));
            }
            Err(e) => {
                // First session error wins; let the rest drain so their
                // children are collected.
                session_error.get_or_insert(e);
            }
        }
    }

    match session_error {
        Some(e) => Err(e),
        None => Ok(table),
    }
}

/// Shared flow of every attach-based profiler: run the child to
/// completion, then parse the collapsed file it wrote, tagging untagged
/// frames with `fill`.
pub(crate) async fn run_and_parse_file(
    supervisor: &strobe_supervise::Supervisor,
    spec: strobe_supervise::CommandSpec,
    timeout: Duration,
    pid: Pid,
    out_path: &std::path::Path,
    fill: strobe_core::FrameSuffix,
) -> Result<PidSamples, ProfilingError> {
    let handle = supervisor.spawn(&spec)?;
    let finished = supervisor.wait_output(handle, timeout).await?;
    if !finished.success() {
        return Err(classify_failure(pid, &finished));
    }

    let content = std::fs::read_to_string(out_path)
        .map_err(|e| ProfilingError::Parse(format!("missing output for pid {pid}: {e}")))?;
    let (samples, tally) = strobe_core::parse_per_pid(&content, fill);
    if tally.all_failed() {
        return Err(ProfilingError::Parse(format!(
            "all {} lines unparsable for pid {pid}",
            tally.skipped
        )));
    }
    Ok(samples)
}

/// Map a failed child to an error kind from its exit status and stderr.
pub fn classify_failure(pid: Pid, finished: &FinishedChild) -> ProfilingError {
    let stderr = finished.stderr_text();
    let lower = stderr.to_lowercase();
    if lower.contains("no such process")
        || lower.contains("no such file or directory")
        || lower.contains("process exited")
        || lower.contains("esrch")
    {
        return ProfilingError::ProcessGone { pid };
    }
    if lower.contains("not a python process")
        || lower.contains("could not find python version")
        || lower.contains("not a ruby process")
    {
        return ProfilingError::EmbeddedRuntime { pid };
    }
    if let Some(signal) = finished.terminating_signal() {
        return ProfilingError::ChildCrashed {
            reason: format!("killed by signal {signal}"),
        };
    }
    let first_line = stderr.lines().next().unwrap_or("no diagnostic output");
    ProfilingError::ChildCrashed {
        reason: format!("exit {:?}: {first_line}", finished.status.code()),
    }
}

/// Tagged dispatch over the per-runtime drivers.
pub enum RuntimeDriver {
    Java(JavaDriver),
    Python(PythonDriver),
    Ruby(RubyDriver),
    Php(PhpDriver),
    DotNet(DotNetDriver),
}

impl RuntimeDriver {
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeDriver::Java(_) => "java",
            RuntimeDriver::Python(_) => "python",
            RuntimeDriver::Ruby(_) => "ruby",
            RuntimeDriver::Php(_) => "php",
            RuntimeDriver::DotNet(_) => "dotnet",
        }
    }

    pub fn runtime(&self) -> RuntimeKind {
        match self {
            RuntimeDriver::Java(_) => RuntimeKind::Java,
            RuntimeDriver::Python(_) => RuntimeKind::Python,
            RuntimeDriver::Ruby(_) => RuntimeKind::Ruby,
            RuntimeDriver::Php(_) => RuntimeKind::Php,
            RuntimeDriver::DotNet(_) => RuntimeKind::DotNet,
        }
    }

    /// Profile this driver's targets for one cycle.
    pub async fn snapshot(
        &mut self,
        ctx: &CycleContext,
    ) -> Result<StackTable, ProfilingError> {
        match self {
            RuntimeDriver::Java(d) => d.snapshot(ctx).await,
            RuntimeDriver::Python(d) => d.snapshot(ctx).await,
            RuntimeDriver::Ruby(d) => d.snapshot(ctx).await,
            RuntimeDriver::Php(d) => d.snapshot(ctx).await,
            RuntimeDriver::DotNet(d) => d.snapshot(ctx).await,
        }
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
