// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operating modes and remote control.
//!
//! Continuous mode builds the scheduler immediately and runs it until
//! signalled. Heartbeat mode keeps the agent idle, with no scheduler, no
//! drivers, and no perf discovery, until a remote `start` command arrives;
//! `stop` tears everything down and returns to idle. Executed command ids
//! go into a persisted bounded history so redelivered commands are no-ops.

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use strobe_core::ProfilingError;
use strobe_supervise::StopFlag;

use crate::config::AgentConfig;
use crate::heartbeat::{CommandKind, HeartbeatClient, RemoteCommand, POLL_INTERVAL};
use crate::history::CommandHistory;
use crate::scheduler::Scheduler;

/// A scheduler running as a background task.
struct ActiveRun {
    stop: StopFlag,
    task: JoinHandle<Scheduler>,
}

pub struct ControlPlane {
    cfg: AgentConfig,
    /// Process-level stop (signals); distinct from the per-run stop flag
    /// so a remote stop returns the agent to idle instead of exiting.
    process_stop: StopFlag,
    history: CommandHistory,
    client: HeartbeatClient,
    active: Option<ActiveRun>,
}

impl ControlPlane {
    pub fn new(cfg: AgentConfig, process_stop: StopFlag) -> Result<Self, ProfilingError> {
        let server = cfg.server.as_ref().ok_or_else(|| {
            ProfilingError::ConfigInvalid("heartbeat mode requires a server".to_string())
        })?;
        let client = HeartbeatClient::new(&server.host, &server.token, &cfg.service_name)
            .map_err(|e| ProfilingError::ConfigInvalid(format!("bad server config: {e}")))?;
        let history = CommandHistory::load(cfg.command_history_path());
        Ok(Self {
            cfg,
            process_stop,
            history,
            client,
            active: None,
        })
    }

    pub fn is_profiling(&self) -> bool {
        self.active.is_some()
    }

    /// Poll for commands until the process is told to stop.
    pub async fn run(&mut self) {
        info!(poll_s = POLL_INTERVAL.as_secs(), "heartbeat mode: idle until started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = self.process_stop.cancelled() => break,
            }

            let commands = match self.client.poll().await {
                Ok(commands) => commands,
                Err(e) => {
                    debug!(error = %e, "heartbeat poll failed");
                    continue;
                }
            };
            for command in commands {
                self.handle(command).await;
                if self.process_stop.is_stopped() {
                    break;
                }
            }
        }
        // Process exit path: tear down whatever is running.
        self.stop_active().await;
    }

    async fn handle(&mut self, command: RemoteCommand) {
        if self.history.contains(&command.id) {
            debug!(command = %command.id, "command already executed, skipping");
            self.client.ack(&command.id, "duplicate").await;
            return;
        }

        info!(command = %command.id, kind = ?command.kind, "executing control command");
        let status = match command.kind {
            CommandKind::Start => self.start_active().await,
            CommandKind::Stop => {
                self.stop_active().await;
                "stopped"
            }
            CommandKind::Reconfigure => {
                // Teardown and rebuild: configuration is immutable per run.
                self.stop_active().await;
                if let Err(e) = apply_overrides(&mut self.cfg, &command.args) {
                    warn!(error = %e, "reconfigure arguments rejected");
                    "rejected"
                } else {
                    self.start_active().await
                }
            }
        };
        self.history.record(&command.id);
        self.client.ack(&command.id, status).await;
    }

    /// Construct and launch a scheduler. This is the first time drivers
    /// exist and perf event discovery runs in heartbeat mode.
    async fn start_active(&mut self) -> &'static str {
        if self.active.is_some() {
            debug!("start command while already profiling");
            return "already-running";
        }
        let mut scheduler = match Scheduler::build(self.cfg.clone()) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                warn!(error = %e, "cannot build scheduler");
                return "failed";
            }
        };
        let stop = scheduler.stop_flag();
        let task = tokio::spawn(async move {
            if scheduler.start().await.is_ok() {
                scheduler.run().await;
            }
            scheduler
        });
        self.active = Some(ActiveRun { stop, task });
        "started"
    }

    /// Stop the active run, best-effort and idempotent.
    async fn stop_active(&mut self) {
        let Some(run) = self.active.take() else {
            return;
        };
        run.stop.stop();
        match run.task.await {
            Ok(mut scheduler) => scheduler.shutdown().await,
            Err(e) => warn!(error = %e, "scheduler task failed during stop"),
        }
        info!("returned to idle");
    }
}

/// Apply the small set of supported reconfigure overrides.
fn apply_overrides(
    cfg: &mut AgentConfig,
    args: &serde_json::Value,
) -> Result<(), ProfilingError> {
    if args.is_null() {
        return Ok(());
    }
    if let Some(frequency) = args.get("frequency") {
        let frequency = frequency.as_u64().filter(|f| *f >= 1 && *f <= 100_000).ok_or_else(
            || ProfilingError::ConfigInvalid(format!("bad frequency {frequency}")),
        )?;
        cfg.frequency = frequency as u32;
    }
    if let Some(duration) = args.get("duration") {
        let duration = duration.as_u64().filter(|d| *d >= 1).ok_or_else(|| {
            ProfilingError::ConfigInvalid(format!("bad duration {duration}"))
        })?;
        cfg.duration = std::time::Duration::from_secs(duration);
    }
    Ok(())
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
