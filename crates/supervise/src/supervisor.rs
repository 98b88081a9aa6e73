// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The process-wide subprocess live-set and its lifecycle contract.
//!
//! Invariant: for any handle, at most one of {running, reaped, dropped}
//! holds. A handle leaves the live-set exactly once, and on every exit
//! path (normal wait, timeout kill, cancellation, background reap) the
//! parent-side pipes are closed before the handle is forgotten.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use strobe_core::{Pid, ProfilingError};

use crate::command::CommandSpec;
use crate::stop::StopFlag;

/// Default grace between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Opaque reference to a supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    id: u64,
    /// Child OS pid; 0 when the child died before its pid was observed.
    pub child_pid: Pid,
}

/// Exit status plus collected output of a finished child.
#[derive(Debug)]
pub struct FinishedChild {
    pub status: std::process::ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl FinishedChild {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// The signal that terminated the child, if any.
    pub fn terminating_signal(&self) -> Option<i32> {
        std::os::unix::process::ExitStatusExt::signal(&self.status)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Counters from one reclamation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    /// Live-set entries examined.
    pub scanned: usize,
    /// Children whose exit status was collected and entry removed.
    pub reaped: usize,
    /// Parent-side pipe fds closed by the sweep.
    pub pipes_closed: usize,
}

#[derive(Debug)]
struct Entry {
    /// Taken (`None`) while a waiter owns the child exclusively.
    child: Option<Child>,
    display: String,
    spawned_at: Instant,
}

#[derive(Debug)]
struct Inner {
    live: Mutex<HashMap<u64, Entry>>,
    next_id: AtomicU64,
    kill_grace: Duration,
    stop: StopFlag,
}

/// Sole authority for creating and reaping child processes.
#[derive(Debug, Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(stop: StopFlag, kill_grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                live: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                kill_grace,
                stop,
            }),
        }
    }

    pub fn stop_flag(&self) -> &StopFlag {
        &self.inner.stop
    }

    pub fn kill_grace(&self) -> Duration {
        self.inner.kill_grace
    }

    /// Number of handles currently in the live-set.
    pub fn live_count(&self) -> usize {
        self.inner.live.lock().len()
    }

    /// Spawn a child and register it in the live-set.
    pub fn spawn(&self, spec: &CommandSpec) -> Result<Handle, ProfilingError> {
        let child = spec
            .build()
            .spawn()
            .map_err(|e| ProfilingError::SpawnFailed {
                program: spec.program().to_string(),
                reason: e.to_string(),
            })?;
        let child_pid = child.id().map(|p| p as Pid).unwrap_or(0);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(child_pid, command = %spec.display(), "spawned");
        self.inner.live.lock().insert(
            id,
            Entry {
                child: Some(child),
                display: spec.display(),
                spawned_at: Instant::now(),
            },
        );
        Ok(Handle { id, child_pid })
    }

    /// Take exclusive ownership of a handle's child, or fail with
    /// [`ProfilingError::ReapRace`] when a concurrent waiter or reaper got
    /// there first.
    fn take_child(&self, handle: Handle) -> Result<(Child, String), ProfilingError> {
        let mut live = self.inner.live.lock();
        let entry = live.get_mut(&handle.id).ok_or(ProfilingError::ReapRace)?;
        let child = entry.child.take().ok_or(ProfilingError::ReapRace)?;
        Ok((child, entry.display.clone()))
    }

    fn forget(&self, handle: Handle) {
        self.inner.live.lock().remove(&handle.id);
    }

    /// Wait for a child with a wall-clock timeout.
    ///
    /// On timeout the child gets SIGTERM, the kill grace, then SIGKILL; on
    /// a stop request the same ladder runs immediately. On every path the
    /// handle leaves the live-set with all pipes closed.
    pub async fn wait_output(
        &self,
        handle: Handle,
        timeout: Duration,
    ) -> Result<FinishedChild, ProfilingError> {
        eprintln!("DEBUG wait_output start t={:?}", Instant::now());
        let (mut child, display_name) = self.take_child(handle)?;
        eprintln!("DEBUG took child t={:?}", Instant::now());
        let stdout_task = collect_stream(child.stdout.take());
        let stderr_task = collect_stream(child.stderr.take());
        eprintln!("DEBUG entering select t={:?}", Instant::now());

        let outcome = tokio::select! {
            res = tokio::time::timeout(timeout, child.wait()) => Some(res),
            _ = self.inner.stop.cancelled() => None,
        };
        eprintln!("DEBUG select resolved t={:?}", Instant::now());

        let result = match outcome {
            Some(Ok(Ok(status))) => Ok(FinishedChild {
                status,
                stdout: join_collector(stdout_task).await,
                stderr: join_collector(stderr_task).await,
            }),
            Some(Ok(Err(e))) => Err(ProfilingError::ChildCrashed {
                reason: format!("wait on {display_name} failed: {e}"),
            }),
            Some(Err(_elapsed)) => {
                warn!(command = %display_name, timeout_s = timeout.as_secs(), "child timed out, killing");
                eprintln!("DEBUG before shut_down t={:?}", Instant::now());
                shut_down(&mut child, self.inner.kill_grace).await;
                eprintln!("DEBUG after shut_down t={:?}", Instant::now());
                // Drain the collectors so their pipe fds close promptly.
                join_collector(stdout_task).await;
                eprintln!("DEBUG after stdout collector t={:?}", Instant::now());
                join_collector(stderr_task).await;
                eprintln!("DEBUG after stderr collector t={:?}", Instant::now());
                Err(ProfilingError::ChildTimeout {
                    program: display_name.clone(),
                    pid: handle.child_pid,
                    seconds: timeout.as_secs(),
                })
            }
            None => {
                debug!(command = %display_name, "stop requested, terminating child");
                shut_down(&mut child, self.inner.kill_grace).await;
                join_collector(stdout_task).await;
                join_collector(stderr_task).await;
                Err(ProfilingError::Cancelled)
            }
        };

        drop(child);
        self.forget(handle);
        result
    }

    /// Detach a child's stdout for streaming consumption.
    ///
    /// The caller reads the stream to EOF and then settles the child with
    /// [`Supervisor::wait_output`] (which will collect only stderr). Used
    /// where buffering the whole output is forbidden, e.g. the perf script
    /// reader whose input can reach hundreds of megabytes.
    pub fn take_stdout(&self, handle: Handle) -> Option<tokio::process::ChildStdout> {
        let mut live = self.inner.live.lock();
        live.get_mut(&handle.id)?.child.as_mut()?.stdout.take()
    }

    /// Stop a long-lived child (SIGTERM, grace, SIGKILL) and remove it.
    ///
    /// Used for sessions that are never awaited to completion, such as the
    /// system profiler. Idempotent against concurrent reaping.
    pub async fn terminate(&self, handle: Handle) -> Result<(), ProfilingError> {
        let (mut child, display_name) = match self.take_child(handle) {
            Ok(taken) => taken,
            Err(ProfilingError::ReapRace) => return Ok(()),
            Err(e) => return Err(e),
        };
        debug!(command = %display_name, "terminating long-lived child");
        shut_down(&mut child, self.inner.kill_grace).await;
        drop(child);
        self.forget(handle);
        Ok(())
    }

    /// Reap every child whose exit status is already available, closing its
    /// pipes unconditionally and removing it from the live-set.
    pub fn reap_completed(&self) -> ReapStats {
        let mut stats = ReapStats::default();
        let mut live = self.inner.live.lock();
        stats.scanned = live.len();

        let mut done: Vec<u64> = Vec::new();
        for (id, entry) in live.iter_mut() {
            let Some(child) = entry.child.as_mut() else {
                // A waiter owns this child; it will clean up itself.
                continue;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    let open_pipes =
                        child.stdout.is_some() as usize + child.stderr.is_some() as usize;
                    debug!(
                        command = %entry.display,
                        exit = ?status.code(),
                        age_s = entry.spawned_at.elapsed().as_secs(),
                        open_pipes,
                        "reaping completed child"
                    );
                    stats.pipes_closed += open_pipes;
                    stats.reaped += 1;
                    done.push(*id);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(command = %entry.display, error = %e, "try_wait failed, dropping handle");
                    done.push(*id);
                }
            }
        }

        for id in done {
            // Dropping the entry drops the Child, which closes any pipes
            // still attached to it.
            live.remove(&id);
        }
        stats
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL and reap.
async fn shut_down(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        eprintln!("DEBUG shut_down pid={}", pid);
        let kr = signal::kill(NixPid::from_raw(pid as i32), Signal::SIGTERM);
        eprintln!("DEBUG kill result={:?}", kr);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            eprintln!("DEBUG died within grace");
            return;
        }
        eprintln!("DEBUG grace expired");
        warn!(child_pid = pid, grace_s = grace.as_secs(), "grace expired, sending SIGKILL");
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn collect_stream<R>(stream: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    stream.map(|mut reader| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf).await;
            buf
        })
    })
}

async fn join_collector(task: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
