// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stack sample tables: frames, fingerprints, and per-PID counts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::process::Pid;
use crate::runtime::FrameSuffix;

/// One call-stack frame: a sanitized symbol plus an origin tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    symbol: String,
    pub suffix: FrameSuffix,
}

impl Frame {
    /// Build a frame, replacing `;` in the symbol with `|` so the collapsed
    /// field separator stays unambiguous.
    pub fn new(symbol: impl Into<String>, suffix: FrameSuffix) -> Self {
        let symbol: String = symbol.into();
        let symbol = if symbol.contains(';') {
            symbol.replace(';', "|")
        } else {
            symbol
        };
        Self { symbol, suffix }
    }

    /// Parse a collapsed-format frame, splitting off a trailing suffix tag.
    pub fn parse(text: &str) -> Self {
        let (symbol, suffix) = FrameSuffix::strip(text);
        Self::new(symbol, suffix)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Render the frame as it appears in collapsed output.
    pub fn render(&self) -> String {
        format!("{}{}", self.symbol, self.suffix.as_tag())
    }
}

/// An ordered call stack, root frame first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Fingerprint(pub Vec<Frame>);

impl Fingerprint {
    /// The synthetic single-frame stack used when a PID could not be
    /// profiled but must not vanish from the output.
    pub fn error(cause: &str) -> Self {
        Fingerprint(vec![Frame::new(
            format!("[error: {cause}]"),
            FrameSuffix::None,
        )])
    }

    /// Render frames joined by `;`.
    pub fn render(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(Frame::render).collect();
        parts.join(";")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Sample counts for one process, keyed by stack fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PidSamples {
    counts: HashMap<Fingerprint, u64>,
}

impl PidSamples {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding only a synthetic error stack.
    pub fn error(cause: &str) -> Self {
        let mut samples = Self::new();
        samples.record(Fingerprint::error(cause), 1);
        samples
    }

    /// Add `count` samples of `stack`. Zero counts are ignored.
    pub fn record(&mut self, stack: Fingerprint, count: u64) {
        if count == 0 || stack.is_empty() {
            return;
        }
        *self.counts.entry(stack).or_insert(0) += count;
    }

    /// Total sample count across all stacks.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Mean frames per sample; 0.0 when empty. Used by the smart perf mode
    /// to pick the better unwinding strategy.
    pub fn mean_depth(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let frames: u64 = self
            .counts
            .iter()
            .map(|(stack, count)| stack.len() as u64 * count)
            .sum();
        frames as f64 / total as f64
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Fingerprint, u64)> {
        self.counts.iter().map(|(k, v)| (k, *v))
    }
}

/// Mapping of PID to its sampled stacks for one snapshot.
#[derive(Debug, Clone, Default)]
pub struct StackTable {
    per_pid: HashMap<Pid, PidSamples>,
    /// Command names observed while sampling (perf reports these even for
    /// processes enumeration never saw).
    comms: HashMap<Pid, String>,
}

impl StackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, pid: Pid, stack: Fingerprint, count: u64) {
        self.per_pid.entry(pid).or_default().record(stack, count);
    }

    /// Replace the samples of `pid` wholesale.
    pub fn insert_pid(&mut self, pid: Pid, samples: PidSamples) {
        self.per_pid.insert(pid, samples);
    }

    pub fn observe_comm(&mut self, pid: Pid, comm: impl Into<String>) {
        self.comms.entry(pid).or_insert_with(|| comm.into());
    }

    pub fn comm(&self, pid: Pid) -> Option<&str> {
        self.comms.get(&pid).map(String::as_str)
    }

    pub fn get(&self, pid: Pid) -> Option<&PidSamples> {
        self.per_pid.get(&pid)
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.per_pid.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pid, &PidSamples)> {
        self.per_pid.iter().map(|(pid, s)| (*pid, s))
    }

    /// Keep only PIDs satisfying `keep`.
    pub fn retain_pids(&mut self, mut keep: impl FnMut(Pid) -> bool) {
        self.per_pid.retain(|pid, _| keep(*pid));
        self.comms.retain(|pid, _| keep(*pid));
    }

    /// Fold another table into this one.
    pub fn absorb(&mut self, other: StackTable) {
        for (pid, samples) in other.per_pid {
            let entry = self.per_pid.entry(pid).or_default();
            for (stack, count) in samples.counts {
                entry.record(stack, count);
            }
        }
        for (pid, comm) in other.comms {
            self.comms.entry(pid).or_insert(comm);
        }
    }

    /// Total samples across every PID.
    pub fn total(&self) -> u64 {
        self.per_pid.values().map(PidSamples::total).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.per_pid.is_empty()
    }

    pub fn pid_count(&self) -> usize {
        self.per_pid.len()
    }
}

#[cfg(test)]
#[path = "stack_tests.rs"]
mod tests;
