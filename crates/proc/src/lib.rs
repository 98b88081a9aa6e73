// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! strobe-proc: host process discovery and runtime classification.
//!
//! Enumeration is one pass over `/proc` plus one shared-kernel maps scan
//! per classification pattern: a single `grep -lE` child searches every
//! `/proc/<pid>/maps` at once instead of the agent reading N map files
//! into its own address space. PIDs that vanish or deny access mid-scan
//! are expected and skipped silently.

pub mod cgroup;
pub mod classify;
pub mod cpu;
pub mod stat;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, warn};

use strobe_core::{Clock, Pid, ProcessRecord, ProfilingError, RuntimeKind};
use strobe_supervise::{CommandSpec, Supervisor};

use classify::{Classifier, MapsHits};

/// Enumeration settings, immutable after construction.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub proc_root: PathBuf,
    pub cgroup_root: PathBuf,
    /// Processes younger than this are not runtime-profiled this cycle.
    pub min_profiling_duration: Duration,
    /// Comm pattern selecting PHP workers.
    pub php_filter: String,
    pub extra_denylist: Vec<String>,
    /// Restrict enumeration to these PIDs when given.
    pub explicit_pids: Option<Vec<Pid>>,
    /// Wall-clock budget for each maps scan.
    pub scan_timeout: Duration,
    /// Derive application identifiers from command lines.
    pub application_identifiers: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            min_profiling_duration: Duration::from_secs(10),
            php_filter: classify::DEFAULT_PHP_FILTER.to_string(),
            extra_denylist: Vec::new(),
            explicit_pids: None,
            scan_timeout: Duration::from_secs(30),
            application_identifiers: true,
        }
    }
}

/// Output of one enumeration pass.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Every visible process, including natives the runtime drivers skip.
    pub records: Vec<ProcessRecord>,
    /// Cumulative CPU jiffies per PID, for recent-CPU ranking.
    pub jiffies: HashMap<Pid, u64>,
}

impl ScanResult {
    pub fn host_process_count(&self) -> usize {
        self.records.len()
    }
}

/// Scans `/proc` and classifies what it finds.
pub struct Enumerator {
    cfg: ScanConfig,
    classifier: Classifier,
    supervisor: Supervisor,
}

impl Enumerator {
    pub fn new(cfg: ScanConfig, supervisor: Supervisor) -> Result<Self, ProfilingError> {
        let classifier = Classifier::new(&cfg.php_filter, &cfg.extra_denylist)?;
        Ok(Self {
            cfg,
            classifier,
            supervisor,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.cfg
    }

    /// One shared-kernel maps scan: a single grep child searching every
    /// pid's maps file for `pattern`, returning the matching PIDs.
    async fn maps_scan(&self, pattern: &str) -> HashSet<Pid> {
        let script = format!(
            "grep -lE '{}' {}/[0-9]*/maps",
            pattern,
            self.cfg.proc_root.display()
        );
        let spec = CommandSpec::new("sh").arg("-c").arg(&script);
        let handle = match self.supervisor.spawn(&spec) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "maps scan spawn failed");
                return HashSet::new();
            }
        };
        let finished = match self.supervisor.wait_output(handle, self.cfg.scan_timeout).await {
            Ok(finished) => finished,
            Err(e) => {
                warn!(error = %e, pattern, "maps scan failed");
                return HashSet::new();
            }
        };
        // grep exits 1 on no match and 2 when some files were unreadable;
        // both still produce every match they could on stdout.
        parse_maps_scan(&finished.stdout_text())
    }

    /// Enumerate the host's processes. Failures yield an empty result, not
    /// an error: a scan that cannot complete simply profiles nothing.
    pub async fn enumerate(&self, clock: &dyn Clock) -> ScanResult {
        if self.supervisor.stop_flag().is_stopped() {
            return ScanResult::default();
        }

        let (java_hits, python_hits, dotnet_hits) = tokio::join!(
            self.maps_scan(classify::JAVA_MAPS_PATTERN),
            self.maps_scan(classify::PYTHON_MAPS_PATTERN),
            self.maps_scan(classify::DOTNET_MAPS_PATTERN),
        );

        let btime = fs::read_to_string(self.cfg.proc_root.join("stat"))
            .ok()
            .and_then(|s| stat::parse_btime(&s))
            .unwrap_or(0);
        let hz = stat::clock_ticks_per_sec();
        let now = clock.wall();

        let entries = match fs::read_dir(&self.cfg.proc_root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, root = %self.cfg.proc_root.display(), "cannot read proc root");
                return ScanResult::default();
            }
        };

        let mut result = ScanResult::default();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(pid) = name.to_str().and_then(|n| n.parse::<Pid>().ok()) else {
                continue;
            };
            if let Some(explicit) = &self.cfg.explicit_pids {
                if !explicit.contains(&pid) {
                    continue;
                }
            }

            let pid_dir = entry.path();
            // The process may exit between readdir and these reads.
            let Some(stat_rec) = fs::read_to_string(pid_dir.join("stat"))
                .ok()
                .and_then(|s| stat::parse_stat(&s))
            else {
                continue;
            };
            let exe_path = fs::read_link(pid_dir.join("exe")).unwrap_or_default();
            let cmdline = fs::read(pid_dir.join("cmdline"))
                .map(|bytes| {
                    bytes
                        .split(|b| *b == 0)
                        .filter(|part| !part.is_empty())
                        .map(|part| String::from_utf8_lossy(part).into_owned())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            let container_id = fs::read_to_string(pid_dir.join("cgroup"))
                .ok()
                .and_then(|content| cgroup::container_id(&content));

            let hits = MapsHits {
                java: java_hits.contains(&pid),
                python: python_hits.contains(&pid),
                dotnet: dotnet_hits.contains(&pid),
            };
            let runtime = self.classifier.classify(&exe_path, &stat_rec.comm, hits);

            let mut record = ProcessRecord {
                pid,
                comm: stat_rec.comm.clone(),
                exe_path,
                cmdline,
                create_time: stat::create_time(btime, stat_rec.starttime, hz),
                runtime,
                container_id,
                app_id: None,
            };
            if self.cfg.application_identifiers {
                record.app_id = derive_app_id(&record);
            }

            if record.runtime != RuntimeKind::Native && record.runtime != RuntimeKind::Unknown {
                let validation = self.classifier.validate(
                    &record,
                    now,
                    self.cfg.min_profiling_duration,
                    || fs::read_to_string(pid_dir.join("maps")).unwrap_or_default(),
                );
                if let Err(rejection) = validation {
                    // Still visible to the system profiler, just not a
                    // runtime-driver target.
                    debug!(pid, runtime = %record.runtime, reason = %rejection, "demoting candidate");
                    record.runtime = RuntimeKind::Native;
                }
            }

            result.jiffies.insert(pid, stat_rec.total_jiffies());
            result.records.push(record);
        }

        debug!(
            processes = result.records.len(),
            java = result.records.iter().filter(|r| r.runtime == RuntimeKind::Java).count(),
            python = result.records.iter().filter(|r| r.runtime == RuntimeKind::Python).count(),
            "enumeration complete"
        );
        result
    }
}

/// Cheap host process count: numeric entries under the proc root. Used by
/// the system-profiler gate before any full enumeration has run.
pub fn process_count(proc_root: &std::path::Path) -> usize {
    fs::read_dir(proc_root)
        .map(|entries| {
            entries
                .flatten()
                .filter(|entry| {
                    entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()))
                })
                .count()
        })
        .unwrap_or(0)
}

/// Parse `grep -l` output paths (`…/<pid>/maps`) into PIDs.
fn parse_maps_scan(stdout: &str) -> HashSet<Pid> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut components = line.trim().rsplit('/');
            components.next()?; // "maps"
            components.next()?.parse().ok()
        })
        .collect()
}

/// Best-effort application identifier from the command line.
fn derive_app_id(record: &ProcessRecord) -> Option<String> {
    let args = &record.cmdline;
    match record.runtime {
        RuntimeKind::Python => {
            if let Some(pos) = args.iter().position(|a| a == "-m") {
                return args.get(pos + 1).map(|m| format!("python: -m {m}"));
            }
            args.iter()
                .skip(1)
                .find(|a| a.ends_with(".py"))
                .map(|script| format!("python: {}", tail(script)))
        }
        RuntimeKind::Java => {
            if let Some(pos) = args.iter().position(|a| a == "-jar") {
                return args.get(pos + 1).map(|jar| format!("java: {}", tail(jar)));
            }
            args.iter()
                .skip(1)
                .find(|a| !a.starts_with('-') && !a.contains('/'))
                .map(|class| format!("java: {class}"))
        }
        RuntimeKind::Ruby => args
            .iter()
            .skip(1)
            .find(|a| a.ends_with(".rb"))
            .map(|script| format!("ruby: {}", tail(script))),
        RuntimeKind::NodeJs => args
            .iter()
            .skip(1)
            .find(|a| a.ends_with(".js") || a.ends_with(".mjs"))
            .map(|script| format!("node: {}", tail(script))),
        _ => None,
    }
}

fn tail(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
