// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PHP driver: per-process sampling via phpspy.
//!
//! phpspy writes its own trace format to stdout, one numbered frame per
//! line with depth 0 as the leaf and a blank line ending each sample:
//!
//! ```text
//! 0 Memcached::get() /srv/www/cache.php:41
//! 1 App\Cache::fetch() /srv/www/cache.php:12
//! 2 <main> /srv/www/index.php:3
//! ```

use std::sync::Arc;

use tracing::debug;

use strobe_core::{
    Fingerprint, Frame, FrameSuffix, ParseTally, Pid, PidSamples, ProfilingError, RuntimeKind,
    StackTable,
};
use strobe_supervise::{CommandSpec, Supervisor};

use crate::driver::{self, CycleContext, DriverConfig};

fn command(cfg: &DriverConfig, pid: Pid) -> CommandSpec {
    CommandSpec::new("phpspy")
        .arg("--max-depth=512")
        .arg(format!("--time-limit-ms={}", cfg.duration.as_millis()))
        .arg(format!("--rate-hz={}", cfg.frequency))
        .arg("--pid")
        .arg(pid.to_string())
}

/// Parse phpspy trace output into per-stack counts.
///
/// Frames arrive leaf-first and are reversed into root-first order. Lines
/// that are neither frames nor blank separators (phpspy prints `# err`
/// diagnostics inline) are counted and skipped.
fn parse_phpspy(output: &str) -> (PidSamples, ParseTally) {
    let mut samples = PidSamples::new();
    let mut tally = ParseTally::default();
    let mut block: Vec<Frame> = Vec::new();
    let mut block_ok = true;

    let mut commit =
        |block: &mut Vec<Frame>, block_ok: &mut bool, tally: &mut ParseTally| {
            if *block_ok {
                if !block.is_empty() {
                    let mut frames = std::mem::take(block);
                    frames.reverse();
                    samples.record(Fingerprint(frames), 1);
                    tally.parsed += 1;
                }
            } else {
                block.clear();
                tally.skipped += 1;
            }
            *block_ok = true;
        };

    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            commit(&mut block, &mut block_ok, &mut tally);
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(3, ' ');
        let depth = parts.next().and_then(|d| d.parse::<usize>().ok());
        let symbol = parts.next();
        match (depth, symbol) {
            (Some(_), Some(symbol)) => {
                block.push(Frame::new(symbol, FrameSuffix::Php));
            }
            _ => block_ok = false,
        }
    }
    commit(&mut block, &mut block_ok, &mut tally);

    (samples, tally)
}

pub struct PhpDriver {
    cfg: DriverConfig,
    supervisor: Supervisor,
}

impl PhpDriver {
    pub fn new(cfg: DriverConfig, supervisor: Supervisor) -> Self {
        Self { cfg, supervisor }
    }

    pub async fn snapshot(&mut self, ctx: &CycleContext) -> Result<StackTable, ProfilingError> {
        let targets: Vec<_> = driver::select(ctx, RuntimeKind::Php, &self.cfg)
            .into_iter()
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(StackTable::new());
        }
        debug!(targets = targets.len(), "profiling php workers");

        let supervisor = self.supervisor.clone();
        let cfg = self.cfg.clone();
        driver::fan_out(targets, self.cfg.max_workers, move |record| {
            let supervisor = supervisor.clone();
            let cfg = cfg.clone();
            async move {
                let pid = record.pid;
                let handle = supervisor.spawn(&command(&cfg, pid))?;
                let finished = supervisor.wait_output(handle, cfg.child_timeout()).await?;
                if !finished.success() {
                    return Err(driver::classify_failure(pid, &finished));
                }
                let (samples, tally) = parse_phpspy(&finished.stdout_text());
                if tally.all_failed() {
                    return Err(ProfilingError::Parse(format!(
                        "all {} phpspy blocks unparsable for pid {pid}",
                        tally.skipped
                    )));
                }
                Ok(samples)
            }
        })
        .await
    }
}

#[cfg(test)]
#[path = "php_tests.rs"]
mod tests;
