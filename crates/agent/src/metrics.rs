// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only JSONL record of per-cycle driver telemetry.
//!
//! One line per driver per cycle, written locally so operators can tail
//! outcomes without a backend. Size-rotated, keeping one predecessor.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use tracing::warn;

use strobe_core::CycleTelemetry;

/// Rotate once the file grows past this.
const MAX_METRICS_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug)]
pub struct CycleMetrics {
    path: PathBuf,
}

impl CycleMetrics {
    pub fn new(path: PathBuf) -> Self {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        Self { path }
    }

    /// Append one telemetry record; failures are logged, never fatal.
    pub fn record(&self, telemetry: &CycleTelemetry) {
        self.rotate_if_needed();
        let line = match serde_json::to_string(telemetry) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "cannot serialize cycle telemetry");
                return;
            }
        };
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = appended {
            warn!(error = %e, path = %self.path.display(), "cannot write cycle telemetry");
        }
    }

    fn rotate_if_needed(&self) {
        let Ok(meta) = fs::metadata(&self.path) else {
            return;
        };
        if meta.len() < MAX_METRICS_SIZE {
            return;
        }
        let rotated = self.path.with_extension("jsonl.1");
        if let Err(e) = fs::rename(&self.path, &rotated) {
            warn!(error = %e, "cannot rotate metrics file");
        }
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
