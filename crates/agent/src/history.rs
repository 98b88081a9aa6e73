// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted, bounded history of executed control-command ids.
//!
//! The heartbeat endpoint may redeliver a command after a network blip or
//! an agent restart; executing a remembered id again must be a no-op. The
//! history is a plain line-delimited file holding at most
//! [`HISTORY_CAP`] ids, oldest first, rewritten on trim.

use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, warn};

use strobe_core::CommandId;

/// Maximum remembered command ids.
pub const HISTORY_CAP: usize = 1000;

#[derive(Debug)]
pub struct CommandHistory {
    path: PathBuf,
    ids: VecDeque<String>,
}

impl CommandHistory {
    /// Load the history file; a missing or unreadable file starts empty.
    pub fn load(path: PathBuf) -> Self {
        let ids: VecDeque<String> = match fs::read_to_string(&path) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => VecDeque::new(),
        };
        let mut history = Self { path, ids };
        if history.ids.len() > HISTORY_CAP {
            history.trim();
        }
        history
    }

    pub fn contains(&self, id: &CommandId) -> bool {
        self.ids.iter().any(|known| known == id.as_str())
    }

    /// Remember an executed command id and append it to the file.
    pub fn record(&mut self, id: &CommandId) {
        if self.contains(id) {
            return;
        }
        self.ids.push_back(id.as_str().to_string());

        let appended = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{id}"));
        if let Err(e) = appended {
            warn!(error = %e, path = %self.path.display(), "cannot persist command id");
        }
        if self.ids.len() > HISTORY_CAP {
            self.trim();
        }
    }

    /// Evict oldest entries beyond the cap and rewrite the file.
    /// Returns how many were evicted.
    pub fn trim(&mut self) -> usize {
        let mut evicted = 0;
        while self.ids.len() > HISTORY_CAP {
            self.ids.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            let content: String = self
                .ids
                .iter()
                .map(|id| format!("{id}\n"))
                .collect();
            if let Err(e) = fs::write(&self.path, content) {
                warn!(error = %e, path = %self.path.display(), "cannot rewrite command history");
            }
            debug!(evicted, "trimmed command history");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
#[path = "history_tests.rs"]
mod tests;
