// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by every profiler driver and the orchestrator.

use thiserror::Error;

use crate::process::Pid;

/// How loudly an error should be reported.
///
/// Benign per-PID conditions (a target exiting mid-profile, an embedded
/// interpreter) are everyday noise on busy hosts and log at debug; session
/// errors log at warn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Warn,
}

/// Errors produced by driver and supervisor operations.
#[derive(Debug, Clone, Error)]
pub enum ProfilingError {
    #[error("failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("{program} (child pid {pid}) timed out after {seconds}s and was killed")]
    ChildTimeout {
        program: String,
        pid: Pid,
        seconds: u64,
    },

    #[error("child exited abnormally: {reason}")]
    ChildCrashed { reason: String },

    #[error("output parse failed: {0}")]
    Parse(String),

    #[error("process {pid} disappeared during profiling")]
    ProcessGone { pid: Pid },

    #[error("process {pid} maps a runtime it does not run")]
    EmbeddedRuntime { pid: Pid },

    #[error("perf supports no usable event type on this host")]
    PerfNoSupportedEvent,

    #[error("subprocess handle was reaped concurrently")]
    ReapRace,

    #[error("operation cancelled by stop request")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl ProfilingError {
    /// Reporting severity per the propagation policy: expected per-PID
    /// conditions at debug, everything else at warn.
    pub fn severity(&self) -> Severity {
        match self {
            ProfilingError::ProcessGone { .. }
            | ProfilingError::EmbeddedRuntime { .. }
            | ProfilingError::ReapRace
            | ProfilingError::Cancelled => Severity::Debug,
            _ => Severity::Warn,
        }
    }

    /// Whether the condition should be represented as a synthetic error
    /// stack for the PID instead of dropping the PID from the output.
    pub fn keeps_pid(&self) -> bool {
        matches!(
            self,
            ProfilingError::ProcessGone { .. }
                | ProfilingError::EmbeddedRuntime { .. }
                | ProfilingError::ChildTimeout { .. }
        )
    }

    /// Short stable label used in synthetic `[error: …]` frames.
    pub fn label(&self) -> &'static str {
        match self {
            ProfilingError::SpawnFailed { .. } => "spawn failed",
            ProfilingError::ChildTimeout { .. } => "timeout",
            ProfilingError::ChildCrashed { .. } => "profiler crashed",
            ProfilingError::Parse(_) => "unparsable output",
            ProfilingError::ProcessGone { .. } => "process exited",
            ProfilingError::EmbeddedRuntime { .. } => "embedded runtime",
            ProfilingError::PerfNoSupportedEvent => "no perf event",
            ProfilingError::ReapRace => "reap race",
            ProfilingError::Cancelled => "cancelled",
            ProfilingError::ConfigInvalid(_) => "invalid config",
        }
    }
}
