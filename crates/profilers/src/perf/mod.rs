// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! System profiler: a long-lived `perf record` session spanning many
//! cycles, consumed through `perf script` one rotation file at a time.
//!
//! Unlike the runtime drivers this driver holds state across snapshots:
//! the recording child, its rotation directory, and the wall-clock age
//! and memory bookkeeping behind the restart policy. Event-type discovery
//! is deferred to [`PerfDriver::start`]; constructing the driver performs
//! no probing, so heartbeat mode stays lightweight until a start command
//! arrives.

pub mod script;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use strobe_core::{Pid, ProfilingError, StackTable};
use strobe_proc::cgroup;
use strobe_supervise::{CommandSpec, PipeMode, Supervisor};

use script::ScriptParser;

/// Stack unwinding strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfMode {
    /// Frame pointers.
    Fp,
    /// DWARF unwinding from stack snapshots.
    Dwarf,
    /// Run both and keep, per PID, whichever unwound deeper.
    Smart,
    Disabled,
}

/// What the recording session covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerfScope {
    SystemWide,
    /// `-G` enumeration only; no fallback to system-wide.
    Cgroups(Vec<String>),
}

/// Tunables for the system profiler. All of these are configuration, not
/// hard-coded behavior.
#[derive(Debug, Clone)]
pub struct PerfSettings {
    pub mode: PerfMode,
    pub frequency: u32,
    pub duration: Duration,
    /// Restart the session once it is older than this.
    pub restart_after: Duration,
    /// Restart the session once the perf child's resident set exceeds this.
    pub mem_cap_bytes: u64,
    /// Skip starting perf entirely above this host process count; 0 = off.
    pub skip_system_profilers_above: usize,
    /// Scope recording to the busiest docker container cgroups.
    pub use_cgroups: bool,
    pub max_cgroups: usize,
    /// DWARF stack snapshot size in bytes.
    pub dwarf_stack_size: u32,
    pub cgroup_root: PathBuf,
    pub proc_root: PathBuf,
}

impl Default for PerfSettings {
    fn default() -> Self {
        Self {
            mode: PerfMode::Fp,
            frequency: 11,
            duration: Duration::from_secs(60),
            restart_after: Duration::from_secs(600),
            mem_cap_bytes: 200 * 1024 * 1024,
            skip_system_profilers_above: 0,
            use_cgroups: false,
            max_cgroups: 10,
            dwarf_stack_size: 8192,
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl PerfSettings {
    /// Rotation period: short windows at low frequency so a batch closes
    /// within every snapshot, longer ones otherwise to bound file count.
    pub fn switch_every(&self) -> Duration {
        if self.frequency <= 11 {
            self.duration.mul_f64(1.5)
        } else {
            self.duration.mul_f64(3.0)
        }
    }
}

/// Rotated files kept on disk per session; older ones are deleted.
const ROTATION_KEEP: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unwind {
    Fp,
    Dwarf,
}

impl Unwind {
    fn label(self) -> &'static str {
        match self {
            Unwind::Fp => "fp",
            Unwind::Dwarf => "dwarf",
        }
    }
}

struct Session {
    handle: strobe_supervise::Handle,
    unwind: Unwind,
    dir: PathBuf,
    started: Instant,
    /// Name of the newest rotation file already consumed.
    consumed: Option<String>,
}

pub struct PerfDriver {
    settings: PerfSettings,
    supervisor: Supervisor,
    /// Extra `-e` args found by event discovery; `Some` once discovered.
    event_args: Option<Vec<String>>,
    scope: PerfScope,
    sessions: Vec<Session>,
    out_root: Option<tempfile::TempDir>,
}

impl PerfDriver {
    pub fn new(settings: PerfSettings, supervisor: Supervisor) -> Self {
        Self {
            settings,
            supervisor,
            event_args: None,
            scope: PerfScope::SystemWide,
            sessions: Vec::new(),
            out_root: None,
        }
    }

    /// Whether a recording session is live.
    pub fn is_active(&self) -> bool {
        !self.sessions.is_empty()
    }

    pub fn scope(&self) -> &PerfScope {
        &self.scope
    }

    /// Probe which event spec this host's perf supports. Tried in order:
    /// the default hardware event, then software cpu-clock.
    async fn discover_event(&self) -> Result<Vec<String>, ProfilingError> {
        let candidates: [&[&str]; 2] = [&[], &["-e", "cpu-clock"]];
        for candidate in candidates {
            let spec = CommandSpec::new("perf")
                .arg("record")
                .arg("-o")
                .arg("/dev/null")
                .arg("-F")
                .arg(self.settings.frequency.to_string())
                .args(candidate.iter().copied())
                .arg("--")
                .arg("sleep")
                .arg("0");
            let probe = async {
                let handle = self.supervisor.spawn(&spec)?;
                self.supervisor
                    .wait_output(handle, Duration::from_secs(15))
                    .await
            };
            match probe.await {
                Ok(finished) if finished.success() => {
                    debug!(event = ?candidate, "perf event discovered");
                    return Ok(candidate.iter().map(|s| s.to_string()).collect());
                }
                Ok(finished) => {
                    debug!(
                        event = ?candidate,
                        stderr = %finished.stderr_text().lines().next().unwrap_or(""),
                        "perf event probe rejected"
                    );
                }
                Err(e) => {
                    debug!(event = ?candidate, error = %e, "perf event probe failed");
                }
            }
        }
        Err(ProfilingError::PerfNoSupportedEvent)
    }

    fn record_command(&self, unwind: Unwind, dir: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new("perf")
            .arg("record")
            .arg("-F")
            .arg(self.settings.frequency.to_string())
            .stdout(PipeMode::Null)
            .stderr(PipeMode::Null);
        spec = match unwind {
            Unwind::Fp => spec.arg("-g"),
            Unwind::Dwarf => spec
                .arg("--call-graph")
                .arg(format!("dwarf,{}", self.settings.dwarf_stack_size)),
        };
        if let Some(event_args) = &self.event_args {
            spec = spec.args(event_args.iter().cloned());
        }
        spec = match &self.scope {
            PerfScope::SystemWide => spec.arg("-a"),
            PerfScope::Cgroups(cgroups) => spec.arg("-G").arg(cgroups.join(",")),
        };
        spec.arg(format!(
            "--switch-output={}s",
            self.settings.switch_every().as_secs()
        ))
        .arg("-o")
        .arg(dir.join("perf.data").display().to_string())
    }

    async fn launch(&mut self, unwind: Unwind) -> Result<Session, ProfilingError> {
        let root = match &self.out_root {
            Some(root) => root.path().to_path_buf(),
            None => {
                let dir = tempfile::tempdir().map_err(|e| ProfilingError::SpawnFailed {
                    program: "perf".to_string(),
                    reason: format!("cannot create rotation dir: {e}"),
                })?;
                let path = dir.path().to_path_buf();
                self.out_root = Some(dir);
                path
            }
        };
        let dir = root.join(unwind.label());
        fs::create_dir_all(&dir).map_err(|e| ProfilingError::SpawnFailed {
            program: "perf".to_string(),
            reason: format!("cannot create {}: {e}", dir.display()),
        })?;

        let spec = self.record_command(unwind, &dir);
        let handle = self.supervisor.spawn(&spec)?;
        info!(
            unwind = unwind.label(),
            child_pid = handle.child_pid,
            switch_every_s = self.settings.switch_every().as_secs(),
            "perf session started"
        );
        Ok(Session {
            handle,
            unwind,
            dir,
            started: Instant::now(),
            consumed: None,
        })
    }

    /// Start recording. Event discovery happens here, on the first start,
    /// never in the constructor. A host over the process-count gate gets
    /// no session at all; the gate is enforced at start time because a
    /// running perf child cannot be cancelled cheaply.
    pub async fn start(&mut self, host_process_count: usize) -> Result<(), ProfilingError> {
        if self.settings.mode == PerfMode::Disabled || self.is_active() {
            return Ok(());
        }
        let gate = self.settings.skip_system_profilers_above;
        if gate > 0 && host_process_count > gate {
            warn!(
                host_process_count,
                gate, "too many processes on host, system profiler suppressed"
            );
            return Ok(());
        }

        if self.event_args.is_none() {
            self.event_args = Some(self.discover_event().await?);
        }

        if self.settings.use_cgroups {
            let found = cgroup::docker_cgroups(&self.settings.cgroup_root, self.settings.max_cgroups);
            if found.is_empty() {
                warn!("cgroup scoping requested but no container cgroups found; not recording");
                return Ok(());
            }
            self.scope = PerfScope::Cgroups(
                found.into_iter().map(|c| c.relative_path).collect(),
            );
        }

        let unwinds: &[Unwind] = match self.settings.mode {
            PerfMode::Fp => &[Unwind::Fp],
            PerfMode::Dwarf => &[Unwind::Dwarf],
            PerfMode::Smart => &[Unwind::Fp, Unwind::Dwarf],
            PerfMode::Disabled => &[],
        };
        for unwind in unwinds {
            let session = self.launch(*unwind).await?;
            self.sessions.push(session);
        }
        Ok(())
    }

    /// Collect one snapshot's worth of samples.
    ///
    /// Failures inside a session (including the documented `perf script`
    /// segfaults on some GPU hosts) degrade to an empty table with a
    /// warning; they never propagate.
    pub async fn snapshot(&mut self, pid_filter: Option<&HashSet<Pid>>) -> StackTable {
        if self.sessions.is_empty() {
            return StackTable::new();
        }

        let mut sessions = std::mem::take(&mut self.sessions);
        let mut per_unwind: Vec<(Unwind, StackTable)> = Vec::new();
        for session in &mut sessions {
            let table = self.consume(session).await;
            per_unwind.push((session.unwind, table));
        }
        self.sessions = sessions;

        let mut table = choose_best(per_unwind);
        if let Some(filter) = pid_filter {
            table.retain_pids(|pid| filter.contains(&pid));
        }

        self.maybe_restart().await;
        table
    }

    /// Wait for the rotation timer to close a batch, or the profiling
    /// window, whichever comes first; then parse the newest closed file.
    async fn consume(&self, session: &mut Session) -> StackTable {
        let stop = self.supervisor.stop_flag().clone();
        let deadline = Instant::now() + self.settings.duration;
        let newest = loop {
            let newest = newest_rotation(&session.dir, session.consumed.as_deref());
            if newest.is_some() || Instant::now() >= deadline {
                break newest;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                _ = stop.cancelled() => return StackTable::new(),
            }
        };
        let Some(file) = newest else {
            debug!(unwind = session.unwind.label(), "no closed rotation file this cycle");
            return StackTable::new();
        };

        let table = match self.run_script(&file).await {
            Ok(table) => table,
            Err(e) => {
                warn!(error = %e, unwind = session.unwind.label(), "perf script failed for this cycle");
                StackTable::new()
            }
        };

        session.consumed = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        prune_rotations(&session.dir, &file);
        table
    }

    /// Stream `perf script` output through the incremental parser. The
    /// child's stdout is consumed line by line; whole-output buffering is
    /// forbidden because rotation files can expand to hundreds of
    /// megabytes of text.
    async fn run_script(&self, file: &Path) -> Result<StackTable, ProfilingError> {
        let spec = CommandSpec::new("perf")
            .arg("script")
            .arg("-i")
            .arg(file.display().to_string())
            .arg("--no-inline")
            .arg("-f");
        let handle = self.supervisor.spawn(&spec)?;
        let stdout = self.supervisor.take_stdout(handle);

        let mut parser = ScriptParser::new();
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                parser.push_line(&line);
            }
        }

        let finished = self
            .supervisor
            .wait_output(handle, self.settings.duration + Duration::from_secs(10))
            .await?;
        if finished.terminating_signal() == Some(nix::libc::SIGSEGV) {
            warn!(file = %file.display(), "perf script segfaulted (known on some GPU hosts), dropping batch");
            return Ok(StackTable::new());
        }
        if !finished.success() {
            return Err(ProfilingError::ChildCrashed {
                reason: format!(
                    "perf script exit {:?}: {}",
                    finished.status.code(),
                    finished.stderr_text().lines().next().unwrap_or("")
                ),
            });
        }

        let (table, tally) = parser.finish();
        if tally.all_failed() {
            warn!(skipped = tally.skipped, "every perf sample failed to parse this cycle");
        } else if tally.skipped > 0 {
            debug!(parsed = tally.parsed, skipped = tally.skipped, "perf script parsed with skips");
        }
        Ok(table)
    }

    /// Restart sessions that outgrew their age or memory budget.
    async fn maybe_restart(&mut self) {
        let mut restart = Vec::new();
        for (idx, session) in self.sessions.iter().enumerate() {
            let age = session.started.elapsed();
            let rss = rss_bytes(&self.settings.proc_root, session.handle.child_pid);
            let over_age = age > self.settings.restart_after;
            let over_mem = rss.is_some_and(|r| r > self.settings.mem_cap_bytes);
            if over_age || over_mem {
                info!(
                    unwind = session.unwind.label(),
                    age_s = age.as_secs(),
                    rss_mb = rss.unwrap_or(0) / (1024 * 1024),
                    over_age,
                    over_mem,
                    "restarting perf session"
                );
                restart.push(idx);
            }
        }
        for idx in restart.into_iter().rev() {
            let session = self.sessions.remove(idx);
            let unwind = session.unwind;
            if let Err(e) = self.supervisor.terminate(session.handle).await {
                warn!(error = %e, "failed to stop perf session");
            }
            match self.launch(unwind).await {
                Ok(session) => self.sessions.push(session),
                Err(e) => warn!(error = %e, "failed to relaunch perf session"),
            }
        }
    }

    /// Tear down every session. Idempotent.
    pub async fn stop(&mut self) {
        for session in std::mem::take(&mut self.sessions) {
            if let Err(e) = self.supervisor.terminate(session.handle).await {
                warn!(error = %e, "failed to stop perf session");
            }
        }
        self.out_root = None;
    }
}

/// Newest closed rotation file, strictly newer than the already-consumed
/// one. `perf record --switch-output` names closed batches
/// `perf.data.<timestamp>`; the bare `perf.data` is the open batch.
fn newest_rotation(dir: &Path, consumed: Option<&str>) -> Option<PathBuf> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.strip_prefix("perf.data.").is_some().then_some(name)
        })
        .collect();
    names.sort_unstable();
    let newest = names.pop()?;
    if let Some(consumed) = consumed {
        if newest.as_str() <= consumed {
            return None;
        }
    }
    Some(dir.join(newest))
}

/// Delete everything older than the just-consumed file, and cap the
/// leftovers so the directory never holds more than a few rotations.
fn prune_rotations(dir: &Path, consumed: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let consumed_name = consumed
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut rotations: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.starts_with("perf.data.").then_some(name)
        })
        .collect();
    rotations.sort_unstable();

    let keep_newest: HashSet<String> = rotations
        .iter()
        .rev()
        .take(ROTATION_KEEP)
        .cloned()
        .collect();
    for name in rotations {
        if name <= consumed_name || !keep_newest.contains(&name) {
            let _ = fs::remove_file(dir.join(&name));
        }
    }
}

/// Merge per-unwind tables: keep, for each PID, the table whose stacks
/// unwound deeper. Ties prefer DWARF.
fn choose_best(mut per_unwind: Vec<(Unwind, StackTable)>) -> StackTable {
    if per_unwind.len() < 2 {
        return per_unwind
            .pop()
            .map(|(_, table)| table)
            .unwrap_or_default();
    }
    let Some((_, second)) = per_unwind.pop() else {
        return StackTable::new();
    };
    let Some((first_unwind, first)) = per_unwind.pop() else {
        return second;
    };

    let mut out = StackTable::new();
    let pids: HashSet<Pid> = first.pids().chain(second.pids()).collect();
    for pid in pids {
        let (winner, comm) = match (first.get(pid), second.get(pid)) {
            (Some(a), Some(b)) => {
                let prefer_first = a.mean_depth() > b.mean_depth()
                    || (a.mean_depth() == b.mean_depth() && first_unwind == Unwind::Dwarf);
                if prefer_first {
                    (a.clone(), first.comm(pid))
                } else {
                    (b.clone(), second.comm(pid))
                }
            }
            (Some(a), None) => (a.clone(), first.comm(pid)),
            (None, Some(b)) => (b.clone(), second.comm(pid)),
            (None, None) => continue,
        };
        out.insert_pid(pid, winner);
        if let Some(comm) = comm {
            out.observe_comm(pid, comm);
        }
    }
    out
}

/// Resident set of a process, from `/proc/<pid>/status` `VmRSS`.
fn rss_bytes(proc_root: &Path, pid: Pid) -> Option<u64> {
    let status = fs::read_to_string(proc_root.join(pid.to_string()).join("status")).ok()?;
    let kb: u64 = status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))?
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .ok()?;
    Some(kb * 1024)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
