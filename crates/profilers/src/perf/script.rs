// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Incremental parser for `perf script` text output.
//!
//! The input is a stream of sample blocks:
//!
//! ```text
//! nginx  1234/1234  [003] 123456.789: 9090909 cpu-clock:
//!         ffffffff9d2001c0 do_syscall_64+0x50 ([kernel.kallsyms])
//!             7f1c3c2e9abc __libc_read+0x4c (/usr/lib/libc.so.6)
//!
//! ```
//!
//! Each block is a header line, indented frame lines leaf-first, and a
//! blank terminator. The parser holds exactly one in-flight block, so the
//! resident working set is bounded by the largest single sample no matter
//! how large the stream is; callers must feed lines, never whole files.

use regex::Regex;

use strobe_core::{Fingerprint, Frame, FrameSuffix, ParseTally, Pid, StackTable};

/// One sample's identity, parsed from its header line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Header {
    comm: String,
    pid: Pid,
}

/// Streaming sample accumulator.
pub struct ScriptParser {
    header_re: Regex,
    current: Option<Header>,
    frames: Vec<Frame>,
    /// Set when an in-flight block contained an unusable line.
    poisoned: bool,
    table: StackTable,
    tally: ParseTally,
}

impl Default for ScriptParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptParser {
    pub fn new() -> Self {
        // comm is greedy and may contain spaces; pid/tid anchor the split.
        // The trailing fields (cpu, time, period, event) are not needed.
        #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
        let header_re = Regex::new(r"^(?P<comm>.*?)\s+(?P<pid>\d+)/(?:\d+)\s+").unwrap();
        Self {
            header_re,
            current: None,
            frames: Vec::new(),
            poisoned: false,
            table: StackTable::new(),
            tally: ParseTally::default(),
        }
    }

    fn commit(&mut self) {
        if let Some(header) = self.current.take() {
            if self.poisoned || self.frames.is_empty() {
                self.tally.skipped += 1;
            } else {
                let mut frames = std::mem::take(&mut self.frames);
                frames.reverse(); // leaf-first on the wire, root-first stored
                self.table.observe_comm(header.pid, header.comm);
                self.table.record(header.pid, Fingerprint(frames), 1);
                self.tally.parsed += 1;
            }
        }
        self.frames.clear();
        self.poisoned = false;
    }

    /// Feed one line of `perf script` output.
    pub fn push_line(&mut self, line: &str) {
        let trimmed_end = line.trim_end();
        if trimmed_end.is_empty() {
            self.commit();
            return;
        }

        let indented = line.starts_with(' ') || line.starts_with('\t');
        if !indented {
            // A new header while a block is in flight means the previous
            // block had no terminator; commit what we have.
            self.commit();
            match self.parse_header(trimmed_end) {
                Some(header) => self.current = Some(header),
                None => {
                    // Lost-event warnings and similar noise between blocks.
                    self.tally.skipped += 1;
                }
            }
            return;
        }

        if self.current.is_none() {
            // Frame line without a header; nothing to attach it to.
            self.tally.skipped += 1;
            return;
        }
        match parse_frame(trimmed_end.trim_start()) {
            Some(frame) => self.frames.push(frame),
            None => self.poisoned = true,
        }
    }

    fn parse_header(&self, line: &str) -> Option<Header> {
        let captures = self.header_re.captures(line)?;
        let comm = captures.name("comm")?.as_str().trim().to_string();
        let pid: Pid = captures.name("pid")?.as_str().parse().ok()?;
        if comm.is_empty() {
            return None;
        }
        Some(Header { comm, pid })
    }

    /// Commit any trailing block and return the collected table.
    pub fn finish(mut self) -> (StackTable, ParseTally) {
        self.commit();
        (self.table, self.tally)
    }
}

/// Parse one frame line body: `addr symbol+offset (dso)`.
///
/// Kernel frames get the kernel tag; native symbols stay verbatim.
fn parse_frame(body: &str) -> Option<Frame> {
    let (addr, rest) = body.split_once(char::is_whitespace)?;
    if addr.is_empty() || !addr.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let rest = rest.trim();

    let (symbol_part, dso) = match rest.rsplit_once(" (") {
        Some((symbol, dso)) => (symbol, dso.trim_end_matches(')')),
        None => (rest, ""),
    };
    let symbol = symbol_part
        .rsplit_once("+0x")
        .map(|(s, _)| s)
        .unwrap_or(symbol_part);
    if symbol.is_empty() {
        return None;
    }

    let suffix = if dso.contains("[kernel") || dso.contains("kallsyms") || dso.contains("vmlinux")
    {
        FrameSuffix::Kernel
    } else {
        FrameSuffix::None
    };
    Some(Frame::new(symbol, suffix))
}

#[cfg(test)]
#[path = "script_tests.rs"]
mod tests;
