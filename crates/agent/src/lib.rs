// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! strobe-agent: the profiling orchestrator.
//!
//! Wires enumeration, the runtime drivers, the perf session, the merger,
//! and the upload sinks into a fixed-period snapshot loop, and hosts the
//! two operating modes: continuous (profile from startup until signalled)
//! and heartbeat (idle until a remote start command arrives).

pub mod config;
pub mod control;
pub mod env;
pub mod heartbeat;
pub mod history;
pub mod memory;
pub mod metrics;
pub mod scheduler;
pub mod upload;

pub use config::{AgentConfig, AgentMode, Cli, ServerConfig};
pub use control::ControlPlane;
pub use scheduler::Scheduler;
