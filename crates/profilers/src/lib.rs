// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! strobe-profilers: drivers for the external profiler binaries.
//!
//! One driver per language runtime plus the long-lived `perf` system
//! profiler. Every driver follows the same contract: select targets from
//! the enumerated process set, run the external binary through the
//! supervisor with a bounded timeout, and parse its output into a per-PID
//! stack table. Benign per-target failures become synthetic `[error: …]`
//! stacks so a problematic PID never silently vanishes from the profile.

pub mod driver;
pub mod dotnet;
pub mod java;
pub mod perf;
pub mod php;
pub mod python;
pub mod ruby;

pub use driver::{CycleContext, DriverConfig, RuntimeDriver};
pub use dotnet::DotNetDriver;
pub use java::{JavaDriver, JavaMode};
pub use perf::{PerfDriver, PerfMode, PerfScope, PerfSettings};
pub use php::PhpDriver;
pub use python::{PythonDriver, PythonMode};
pub use ruby::RubyDriver;
