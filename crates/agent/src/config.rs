// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI surface, optional TOML config file, and the validated immutable
//! agent configuration.
//!
//! Layering: command-line flags win, then the config file, then built-in
//! defaults. Validation failures are the only fatal errors the agent has;
//! everything after startup degrades per driver instead of exiting.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use strobe_core::{Pid, ProfilingError};
use strobe_proc::ScanConfig;
use strobe_profilers::{DriverConfig, JavaMode, PerfMode, PerfSettings, PythonMode};

use crate::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PerfModeArg {
    Fp,
    Dwarf,
    Smart,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PythonModeArg {
    Auto,
    Pyperf,
    Pyspy,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JavaModeArg {
    Ap,
    Disabled,
}

/// Command-line flags.
#[derive(Debug, Parser)]
#[command(
    name = "strobe",
    version,
    about = "Continuous multi-runtime CPU profiling agent",
    long_about = "Samples every process on the host each cycle, merges \
runtime-aware stacks (Java, Python, Ruby, PHP, .NET) with system-wide perf \
data, and ships one collapsed profile per cycle. Without -c or \
--enable-heartbeat-server the agent profiles a single cycle and exits."
)]
pub struct Cli {
    /// Profiling duration per cycle, in seconds
    #[arg(short = 'd', long = "profiling-duration")]
    pub duration: Option<u64>,

    /// Sampling frequency, in Hz
    #[arg(short = 'F', long = "profiling-frequency")]
    pub frequency: Option<u32>,

    /// Stack unwinding mode for the system profiler
    #[arg(long, value_enum)]
    pub perf_mode: Option<PerfModeArg>,

    /// Python profiler selection
    #[arg(long, value_enum)]
    pub python_mode: Option<PythonModeArg>,

    /// Java profiler selection
    #[arg(long, value_enum)]
    pub java_mode: Option<JavaModeArg>,

    /// Only profile these PIDs (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub processes_to_profile: Option<Vec<Pid>>,

    /// Cap per runtime profiler on processes per cycle (0 = unlimited)
    #[arg(long)]
    pub max_processes_runtime_profiler: Option<usize>,

    /// Skip the eBPF python profiler when more python processes exist
    #[arg(long = "python-skip-pyperf-profiler-above")]
    pub pyperf_skip_above: Option<usize>,

    /// Do not start system profilers above this host process count (0 = off)
    #[arg(long)]
    pub skip_system_profilers_above: Option<usize>,

    /// Do not profile processes younger than this, in seconds
    #[arg(long = "min-profiling-duration")]
    pub min_profiling_duration: Option<u64>,

    /// Scope perf to the busiest container cgroups instead of system-wide
    #[arg(long)]
    pub perf_use_cgroups: bool,

    /// Cgroup count cap for --perf-use-cgroups
    #[arg(long)]
    pub perf_max_cgroups: Option<usize>,

    /// Docker container count cap for --perf-use-cgroups
    #[arg(long)]
    pub perf_max_docker_containers: Option<usize>,

    /// DWARF stack snapshot size in bytes
    #[arg(long)]
    pub perf_dwarf_stack_size: Option<u32>,

    /// Stay idle until a remote start command arrives
    #[arg(long)]
    pub enable_heartbeat_server: bool,

    /// Backend base URL for uploads and heartbeat polling
    #[arg(long)]
    pub server_host: Option<String>,

    /// Backend API token
    #[arg(long)]
    pub token: Option<String>,

    /// Service name reported with profiles and heartbeats
    #[arg(long)]
    pub service_name: Option<String>,

    /// Also write each cycle's collapsed profile into this directory
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Profile continuously until stopped
    #[arg(short = 'c', long = "continuous")]
    pub continuous: bool,

    /// Do not derive application identifiers from command lines
    #[arg(long)]
    pub disable_application_identifiers: bool,

    /// Comm pattern selecting PHP worker processes
    #[arg(long)]
    pub php_process_filter: Option<String>,

    /// Profiling mode; only "cpu" is supported
    #[arg(long)]
    pub profiling_mode: Option<String>,

    /// Fan-out width per runtime driver
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Concurrent drivers per snapshot
    #[arg(long)]
    pub scheduler_workers: Option<usize>,

    /// Trigger a reclamation sweep above this resident set size (0 = off)
    #[arg(long)]
    pub memory_high_water_mb: Option<u64>,

    /// TOML config file supplying defaults for the flags above
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log filter (overrides STROBE_LOG)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enumerate and classify once, print targets as JSON, and exit
    #[arg(long)]
    pub dry_run: bool,
}

/// Optional TOML file with the same knobs as the CLI.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    duration: Option<u64>,
    frequency: Option<u32>,
    server_host: Option<String>,
    token: Option<String>,
    service_name: Option<String>,
    min_profiling_duration: Option<u64>,
    max_processes_runtime_profiler: Option<usize>,
    pyperf_skip_above: Option<usize>,
    skip_system_profilers_above: Option<usize>,
    memory_high_water_mb: Option<u64>,
    max_workers: Option<usize>,
    scheduler_workers: Option<usize>,
    php_process_filter: Option<String>,
    log_level: Option<String>,
    deny_list: Option<Vec<String>>,
}

/// How the agent runs after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// One snapshot cycle, then exit.
    Once,
    /// Snapshot on a fixed period until signalled.
    Continuous,
    /// Idle until a remote start command arrives.
    Heartbeat,
}

/// Backend connection details.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub token: String,
}

/// Validated, immutable agent configuration. A reconfigure command
/// destroys the scheduler and rebuilds it from a fresh copy.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub duration: Duration,
    pub frequency: u32,
    pub perf_mode: PerfMode,
    pub python_mode: PythonMode,
    pub java_mode: JavaMode,
    pub explicit_pids: Option<Vec<Pid>>,
    pub max_processes: usize,
    pub pyperf_skip_above: usize,
    pub skip_system_profilers_above: usize,
    pub min_profiling_duration: Duration,
    pub perf_use_cgroups: bool,
    pub perf_max_cgroups: usize,
    pub perf_dwarf_stack_size: u32,
    pub max_workers: usize,
    pub scheduler_workers: usize,
    pub memory_high_water_mb: u64,
    pub application_identifiers: bool,
    pub php_filter: String,
    pub extra_denylist: Vec<String>,
    pub server: Option<ServerConfig>,
    pub output_dir: Option<PathBuf>,
    pub mode: AgentMode,
    pub service_name: String,
    pub state_dir: PathBuf,
    pub log_file: Option<PathBuf>,
    pub log_filter: String,
    pub dry_run: bool,
}

impl AgentConfig {
    /// Merge CLI flags over the config file over defaults, then validate.
    pub fn load(cli: Cli) -> Result<Self, ProfilingError> {
        let file = match &cli.config {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    ProfilingError::ConfigInvalid(format!(
                        "cannot read config file {}: {e}",
                        path.display()
                    ))
                })?;
                toml::from_str::<FileConfig>(&content).map_err(|e| {
                    ProfilingError::ConfigInvalid(format!(
                        "bad config file {}: {e}",
                        path.display()
                    ))
                })?
            }
            None => FileConfig::default(),
        };

        if let Some(mode) = &cli.profiling_mode {
            if mode != "cpu" {
                return Err(ProfilingError::ConfigInvalid(format!(
                    "unsupported profiling mode {mode:?}; only \"cpu\" is available"
                )));
            }
        }

        let duration = cli.duration.or(file.duration).unwrap_or(60);
        if duration == 0 {
            return Err(ProfilingError::ConfigInvalid(
                "profiling duration must be at least 1 second".to_string(),
            ));
        }
        let frequency = cli.frequency.or(file.frequency).unwrap_or(11);
        if frequency == 0 || frequency > 100_000 {
            return Err(ProfilingError::ConfigInvalid(format!(
                "profiling frequency {frequency} out of range (1..=100000)"
            )));
        }

        if let Some(pids) = &cli.processes_to_profile {
            if let Some(bad) = pids.iter().find(|pid| **pid <= 0) {
                return Err(ProfilingError::ConfigInvalid(format!(
                    "invalid pid {bad} in --processes-to-profile"
                )));
            }
        }

        let server_host = cli.server_host.clone().or(file.server_host);
        let token = cli.token.clone().or(file.token);
        let server = match (server_host, token) {
            (Some(host), Some(token)) => Some(ServerConfig { host, token }),
            (Some(host), None) => {
                return Err(ProfilingError::ConfigInvalid(format!(
                    "--server-host {host} requires --token"
                )));
            }
            (None, Some(_)) => {
                return Err(ProfilingError::ConfigInvalid(
                    "--token requires --server-host".to_string(),
                ));
            }
            (None, None) => None,
        };

        let mode = match (cli.enable_heartbeat_server, cli.continuous) {
            (true, true) => {
                return Err(ProfilingError::ConfigInvalid(
                    "--continuous and --enable-heartbeat-server are mutually exclusive".to_string(),
                ));
            }
            (true, false) => {
                if server.is_none() {
                    return Err(ProfilingError::ConfigInvalid(
                        "--enable-heartbeat-server requires --server-host and --token".to_string(),
                    ));
                }
                AgentMode::Heartbeat
            }
            (false, true) => AgentMode::Continuous,
            (false, false) => AgentMode::Once,
        };

        if server.is_none() && cli.output_dir.is_none() && !cli.dry_run {
            return Err(ProfilingError::ConfigInvalid(
                "no destination: pass --server-host/--token or --output-dir".to_string(),
            ));
        }

        Ok(Self {
            duration: Duration::from_secs(duration),
            frequency,
            perf_mode: match cli.perf_mode.unwrap_or(PerfModeArg::Fp) {
                PerfModeArg::Fp => PerfMode::Fp,
                PerfModeArg::Dwarf => PerfMode::Dwarf,
                PerfModeArg::Smart => PerfMode::Smart,
                PerfModeArg::Disabled => PerfMode::Disabled,
            },
            python_mode: match cli.python_mode.unwrap_or(PythonModeArg::Auto) {
                PythonModeArg::Auto => PythonMode::Auto,
                PythonModeArg::Pyperf => PythonMode::PyPerf,
                PythonModeArg::Pyspy => PythonMode::PySpy,
                PythonModeArg::Disabled => PythonMode::Disabled,
            },
            java_mode: match cli.java_mode.unwrap_or(JavaModeArg::Ap) {
                JavaModeArg::Ap => JavaMode::Ap,
                JavaModeArg::Disabled => JavaMode::Disabled,
            },
            explicit_pids: cli.processes_to_profile,
            max_processes: cli
                .max_processes_runtime_profiler
                .or(file.max_processes_runtime_profiler)
                .unwrap_or(50),
            pyperf_skip_above: cli
                .pyperf_skip_above
                .or(file.pyperf_skip_above)
                .unwrap_or(100),
            skip_system_profilers_above: cli
                .skip_system_profilers_above
                .or(file.skip_system_profilers_above)
                .unwrap_or(0),
            min_profiling_duration: Duration::from_secs(
                cli.min_profiling_duration
                    .or(file.min_profiling_duration)
                    .unwrap_or(10),
            ),
            perf_use_cgroups: cli.perf_use_cgroups,
            perf_max_cgroups: cli
                .perf_max_docker_containers
                .or(cli.perf_max_cgroups)
                .unwrap_or(10),
            perf_dwarf_stack_size: cli.perf_dwarf_stack_size.unwrap_or(8192),
            max_workers: cli.max_workers.or(file.max_workers).unwrap_or(10),
            scheduler_workers: cli
                .scheduler_workers
                .or(file.scheduler_workers)
                .unwrap_or(4),
            memory_high_water_mb: cli
                .memory_high_water_mb
                .or(file.memory_high_water_mb)
                .unwrap_or(0),
            application_identifiers: !cli.disable_application_identifiers,
            php_filter: cli
                .php_process_filter
                .or(file.php_process_filter)
                .unwrap_or_else(|| strobe_proc::classify::DEFAULT_PHP_FILTER.to_string()),
            extra_denylist: file.deny_list.unwrap_or_default(),
            server,
            output_dir: cli.output_dir,
            mode,
            service_name: cli
                .service_name
                .or(file.service_name)
                .unwrap_or_else(|| "default".to_string()),
            state_dir: env::state_dir(),
            log_file: cli.log_file,
            log_filter: cli
                .log_level
                .or(file.log_level)
                .unwrap_or_else(env::log_filter),
            dry_run: cli.dry_run,
        })
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            frequency: self.frequency,
            duration: self.duration,
            min_profiling_duration: self.min_profiling_duration,
            max_processes: self.max_processes,
            max_workers: self.max_workers,
        }
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            min_profiling_duration: self.min_profiling_duration,
            php_filter: self.php_filter.clone(),
            extra_denylist: self.extra_denylist.clone(),
            explicit_pids: self.explicit_pids.clone(),
            application_identifiers: self.application_identifiers,
            ..ScanConfig::default()
        }
    }

    pub fn perf_settings(&self) -> PerfSettings {
        PerfSettings {
            mode: self.perf_mode,
            frequency: self.frequency,
            duration: self.duration,
            skip_system_profilers_above: self.skip_system_profilers_above,
            use_cgroups: self.perf_use_cgroups,
            max_cgroups: self.perf_max_cgroups,
            dwarf_stack_size: self.perf_dwarf_stack_size,
            ..PerfSettings::default()
        }
    }

    /// Paths derived from the state directory.
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("strobe.pid")
    }

    pub fn command_history_path(&self) -> PathBuf {
        self.state_dir.join("commands.list")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.state_dir.join("metrics").join("cycles.jsonl")
    }

    pub fn default_log_path(&self) -> PathBuf {
        self.state_dir.join("strobe.log")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
