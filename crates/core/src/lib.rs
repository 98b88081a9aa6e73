// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! strobe-core: data model and pure logic for the strobe profiling agent

pub mod clock;
pub mod collapse;
pub mod error;
pub mod id;
pub mod merge;
pub mod process;
pub mod runtime;
pub mod snapshot;
pub mod stack;

pub use clock::{Clock, FakeClock, SystemClock};
pub use collapse::{parse_per_pid, parse_system_wide, ParseTally};
pub use error::{ProfilingError, Severity};
pub use id::{CommandId, CycleId, RunId, ShortId};
pub use merge::{merge, MergeContext, MergeStats, ProcessIdentity};
pub use process::{Pid, ProcessRecord};
pub use runtime::{FrameSuffix, RuntimeKind};
pub use snapshot::{CycleTelemetry, DriverStatus, SnapshotResult};
pub use stack::{Fingerprint, Frame, PidSamples, StackTable};
