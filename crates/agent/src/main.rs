// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! strobe: continuous multi-runtime CPU profiling agent.
//!
//! Modes:
//! - default: one snapshot cycle, then exit
//! - `-c`: profile continuously until SIGINT/SIGTERM
//! - `--enable-heartbeat-server`: idle until the backend sends `start`

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::fs::{self, File, OpenOptions};
use std::io::Write;

use clap::Parser;
use fs2::FileExt;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use strobe_agent::{config::Cli, AgentConfig, AgentMode, ControlPlane, Scheduler};
use strobe_core::SystemClock;
use strobe_supervise::{StopFlag, Supervisor, DEFAULT_KILL_GRACE};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cfg = match AgentConfig::load(cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = fs::create_dir_all(&cfg.state_dir) {
        eprintln!(
            "error: cannot create state directory {}: {e}",
            cfg.state_dir.display()
        );
        std::process::exit(1);
    }

    let _log_guard = setup_logging(&cfg);

    let _lock = match acquire_lock(&cfg) {
        Ok(lock) => lock,
        Err(()) => std::process::exit(1),
    };

    let stop = StopFlag::new();
    spawn_signal_handler(stop.clone());

    let code = run(cfg, stop).await;
    std::process::exit(code);
}

async fn run(cfg: AgentConfig, stop: StopFlag) -> i32 {
    if cfg.dry_run {
        return dry_run(&cfg).await;
    }

    match cfg.mode {
        AgentMode::Once => {
            let mut scheduler = match Scheduler::build(cfg) {
                Ok(scheduler) => scheduler,
                Err(e) => {
                    error!(error = %e, "cannot build scheduler");
                    return 1;
                }
            };
            wire_stop(&stop, scheduler.stop_flag());
            let _ = scheduler.start().await;
            scheduler.run_cycle().await;
            scheduler.shutdown().await;
            0
        }
        AgentMode::Continuous => {
            let mut scheduler = match Scheduler::build(cfg) {
                Ok(scheduler) => scheduler,
                Err(e) => {
                    error!(error = %e, "cannot build scheduler");
                    return 1;
                }
            };
            wire_stop(&stop, scheduler.stop_flag());
            let _ = scheduler.start().await;
            scheduler.run().await;
            scheduler.shutdown().await;
            0
        }
        AgentMode::Heartbeat => {
            let mut plane = match ControlPlane::new(cfg, stop) {
                Ok(plane) => plane,
                Err(e) => {
                    error!(error = %e, "cannot start heartbeat mode");
                    return 1;
                }
            };
            plane.run().await;
            0
        }
    }
}

/// Enumerate and classify once, print the targets as JSON, and exit.
async fn dry_run(cfg: &AgentConfig) -> i32 {
    let supervisor = Supervisor::new(StopFlag::new(), DEFAULT_KILL_GRACE);
    let enumerator = match strobe_proc::Enumerator::new(cfg.scan_config(), supervisor) {
        Ok(enumerator) => enumerator,
        Err(e) => {
            error!(error = %e, "cannot build enumerator");
            return 1;
        }
    };
    let scan = enumerator.enumerate(&SystemClock).await;
    match serde_json::to_string_pretty(&scan.records) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            error!(error = %e, "cannot serialize scan");
            1
        }
    }
}

/// Relay the process stop signal into a scheduler's own flag.
fn wire_stop(process_stop: &StopFlag, run_stop: StopFlag) {
    let process_stop = process_stop.clone();
    tokio::spawn(async move {
        process_stop.cancelled().await;
        run_stop.stop();
    });
}

fn spawn_signal_handler(stop: StopFlag) {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(sigint) => sigint,
            Err(e) => {
                warn!(error = %e, "cannot install SIGINT handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, stopping"),
            _ = sigint.recv() => info!("received SIGINT, stopping"),
        }
        stop.stop();
    });
}

fn setup_logging(cfg: &AgentConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_new(&cfg.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    match &cfg.log_file {
        Some(path) => {
            let file = match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => file,
                Err(e) => {
                    eprintln!("error: cannot open log file {}: {e}", path.display());
                    std::process::exit(1);
                }
            };
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

/// Single agent instance per host: an exclusive lock on the pid file.
fn acquire_lock(cfg: &AgentConfig) -> Result<File, ()> {
    let path = cfg.lock_path();
    let mut file = match OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("error: cannot open lock file {}: {e}", path.display());
            return Err(());
        }
    };
    if file.try_lock_exclusive().is_err() {
        let holder = fs::read_to_string(&path).unwrap_or_default();
        eprintln!("strobe is already running");
        if !holder.trim().is_empty() {
            eprintln!("  pid: {}", holder.trim());
        }
        return Err(());
    }
    let _ = file.set_len(0);
    let _ = writeln!(file, "{}", std::process::id());
    Ok(file)
}
