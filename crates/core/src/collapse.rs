// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parsing of collapsed-stack text produced by external profilers.
//!
//! Two shapes exist in the wild:
//!
//! - per-process files (`frame;frame;frame count`) from attach-based
//!   profilers that were pointed at one PID;
//! - system-wide files whose first field is `comm-pid` from collectors that
//!   sample every matching process at once.
//!
//! Parsing is line-oriented and tolerant: a malformed line is counted and
//! skipped, never an error for the whole file. A cycle is reported as a
//! parse failure only when every line was bad.

use crate::runtime::FrameSuffix;
use crate::stack::{Fingerprint, Frame, PidSamples, StackTable};

/// Outcome counters for one parsed file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseTally {
    pub parsed: usize,
    pub skipped: usize,
}

impl ParseTally {
    /// True when there was input but nothing usable in it.
    pub fn all_failed(&self) -> bool {
        self.parsed == 0 && self.skipped > 0
    }
}

/// Split `frames… count` on the final space.
fn split_count(line: &str) -> Option<(&str, u64)> {
    let (frames, count) = line.rsplit_once(' ')?;
    let count: u64 = count.trim().parse().ok()?;
    Some((frames, count))
}

fn parse_frames(text: &str, fill: FrameSuffix) -> Fingerprint {
    let frames = text
        .split(';')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let frame = Frame::parse(part);
            if frame.suffix == FrameSuffix::None && fill != FrameSuffix::None {
                Frame::new(frame.symbol(), fill)
            } else {
                frame
            }
        })
        .collect();
    Fingerprint(frames)
}

/// Parse a per-process collapsed file, tagging untagged frames with `fill`.
pub fn parse_per_pid(content: &str, fill: FrameSuffix) -> (PidSamples, ParseTally) {
    let mut samples = PidSamples::new();
    let mut tally = ParseTally::default();

    for line in content.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match split_count(line) {
            Some((frames, count)) => {
                let stack = parse_frames(frames, fill);
                if stack.is_empty() {
                    tally.skipped += 1;
                    continue;
                }
                samples.record(stack, count);
                tally.parsed += 1;
            }
            None => tally.skipped += 1,
        }
    }

    (samples, tally)
}

/// Parse a system-wide collapsed file whose leading field is `comm-pid`.
pub fn parse_system_wide(content: &str) -> (StackTable, ParseTally) {
    let mut table = StackTable::new();
    let mut tally = ParseTally::default();

    for line in content.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed = split_count(line).and_then(|(frames, count)| {
            let (head, rest) = frames.split_once(';')?;
            // comm may itself contain dashes; the pid is after the last one.
            let (comm, pid) = head.rsplit_once('-')?;
            let pid: i32 = pid.parse().ok()?;
            Some((comm.to_string(), pid, rest, count))
        });
        match parsed {
            Some((comm, pid, frames, count)) => {
                let stack = parse_frames(frames, FrameSuffix::None);
                if stack.is_empty() {
                    tally.skipped += 1;
                    continue;
                }
                table.observe_comm(pid, comm);
                table.record(pid, stack, count);
                tally.parsed += 1;
            }
            None => tally.skipped += 1,
        }
    }

    (table, tally)
}

#[cfg(test)]
#[path = "collapse_tests.rs"]
mod tests;
