// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The fixed-period snapshot loop.
//!
//! Each cycle: enumerate the host, fan the runtime drivers and the system
//! profiler out concurrently, merge their tables into one collapsed
//! profile, hand it to the sinks, and reclaim resources. Cycles never
//! overlap; an overrunning cycle starts the next one immediately and
//! bumps a counter instead of queueing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use strobe_core::{
    merge, Clock, CycleId, CycleTelemetry, DriverStatus, MergeContext, Pid, ProcessRecord,
    ProfilingError, ProcessIdentity, RunId, RuntimeKind, Severity, SnapshotResult, StackTable,
    SystemClock,
};
use strobe_proc::{cpu::CpuTracker, Enumerator};
use strobe_profilers::{
    CycleContext, DotNetDriver, JavaDriver, PerfDriver, PhpDriver, PythonDriver, RubyDriver,
    RuntimeDriver,
};
use strobe_supervise::{StopFlag, Supervisor, DEFAULT_KILL_GRACE};

use crate::config::AgentConfig;
use crate::memory::MemoryManager;
use crate::metrics::CycleMetrics;
use crate::upload::{DirSink, HttpSink, ProfileSink};

pub struct Scheduler {
    cfg: AgentConfig,
    stop: StopFlag,
    supervisor: Supervisor,
    enumerator: Enumerator,
    drivers: Vec<RuntimeDriver>,
    perf: PerfDriver,
    cpu: CpuTracker,
    sinks: Vec<Box<dyn ProfileSink>>,
    metrics: CycleMetrics,
    memory: MemoryManager,
    run_id: RunId,
    cycle: CycleId,
    overruns: u64,
}

impl Scheduler {
    /// Construct the whole pipeline. Deliberately performs no probing or
    /// child spawning; that happens in [`Scheduler::start`].
    pub fn build(cfg: AgentConfig) -> Result<Self, ProfilingError> {
        let stop = StopFlag::new();
        let supervisor = Supervisor::new(stop.clone(), DEFAULT_KILL_GRACE);
        let enumerator = Enumerator::new(cfg.scan_config(), supervisor.clone())?;

        let dc = cfg.driver_config();
        let drivers = vec![
            RuntimeDriver::Java(JavaDriver::new(dc.clone(), cfg.java_mode, supervisor.clone())),
            RuntimeDriver::Python(PythonDriver::new(
                dc.clone(),
                cfg.python_mode,
                cfg.pyperf_skip_above,
                supervisor.clone(),
            )),
            RuntimeDriver::Ruby(RubyDriver::new(dc.clone(), supervisor.clone())),
            RuntimeDriver::Php(PhpDriver::new(dc.clone(), supervisor.clone())),
            RuntimeDriver::DotNet(DotNetDriver::new(dc.clone(), supervisor.clone())),
        ];
        let perf = PerfDriver::new(cfg.perf_settings(), supervisor.clone());

        let mut sinks: Vec<Box<dyn ProfileSink>> = Vec::new();
        if let Some(server) = &cfg.server {
            let sink = HttpSink::new(&server.host, &server.token, &cfg.service_name)
                .map_err(|e| ProfilingError::ConfigInvalid(format!("bad server config: {e}")))?;
            sinks.push(Box::new(sink));
        }
        if let Some(dir) = &cfg.output_dir {
            sinks.push(Box::new(DirSink::new(dir.clone())));
        }

        let metrics = CycleMetrics::new(cfg.metrics_path());
        let memory = MemoryManager::new(supervisor.clone(), cfg.memory_high_water_mb);

        Ok(Self {
            cfg,
            stop,
            supervisor,
            enumerator,
            drivers,
            perf,
            cpu: CpuTracker::new(),
            sinks,
            metrics,
            memory,
            run_id: RunId::generate(),
            cycle: CycleId(1),
            overruns: 0,
        })
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Launch the system profiler session. This is where perf event-type
    /// discovery runs; its failure disables the system profiler for the
    /// whole session but never stops the runtime drivers.
    pub async fn start(&mut self) -> Result<(), ProfilingError> {
        let host_count = strobe_proc::process_count(&self.enumerator.config().proc_root);
        if let Err(e) = self.perf.start(host_count).await {
            warn!(error = %e, "system profiler disabled for this session");
        }
        info!(
            run_id = %self.run_id.short(8),
            period_s = self.cfg.duration.as_secs(),
            system_profiler = self.perf.is_active(),
            "profiling started"
        );
        Ok(())
    }

    /// Run cycles until stopped.
    pub async fn run(&mut self) {
        loop {
            if self.stop.is_stopped() {
                break;
            }
            let started = Instant::now();
            self.run_cycle().await;
            if self.stop.is_stopped() {
                break;
            }

            let elapsed = started.elapsed();
            let period = self.cfg.duration;
            if elapsed >= period {
                self.overruns += 1;
                warn!(
                    overruns = self.overruns,
                    elapsed_s = elapsed.as_secs(),
                    "cycle overran its period, starting next immediately"
                );
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(period - elapsed) => {}
                _ = self.stop.cancelled() => break,
            }
        }
    }

    /// One complete snapshot cycle.
    pub async fn run_cycle(&mut self) {
        let clock = SystemClock;
        let wall_start = Utc::now();
        let cycle = self.cycle;
        debug!(cycle = %cycle, "cycle begins");

        let scan = self.enumerator.enumerate(&clock).await;
        let ranked = self.cpu.rank(&scan.jiffies);
        let mut merge_ctx = MergeContext::new(
            self.run_id.clone(),
            cycle,
            env!("CARGO_PKG_VERSION"),
            gethostname::gethostname().to_string_lossy().into_owned(),
            wall_start,
            wall_start, // end filled after collection
        );
        build_identities(&scan.records, &mut merge_ctx);
        let ctx = CycleContext::new(scan.records, ranked, clock.wall());

        // Runtime drivers as independent tasks under a bounded pool;
        // perf concurrently alongside. Individual failures are captured
        // per driver and never cancel peers.
        let semaphore = Arc::new(Semaphore::new(self.cfg.scheduler_workers.max(1)));
        let mut join_set: JoinSet<(usize, RuntimeDriver, Result<StackTable, ProfilingError>, u64)> =
            JoinSet::new();
        let driver_count = self.drivers.len();
        for (idx, mut driver) in std::mem::take(&mut self.drivers).into_iter().enumerate() {
            let ctx = ctx.clone();
            let permit = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = permit.acquire_owned().await;
                let started = Instant::now();
                let result = driver.snapshot(&ctx).await;
                (idx, driver, result, started.elapsed().as_millis() as u64)
            });
        }

        let pid_filter: Option<HashSet<Pid>> = self
            .cfg
            .explicit_pids
            .as_ref()
            .map(|pids| pids.iter().copied().collect());
        let perf_started = Instant::now();
        let perf_fut = self.perf.snapshot(pid_filter.as_ref());
        let drivers_fut = async {
            let mut slots: Vec<Option<RuntimeDriver>> = (0..driver_count).map(|_| None).collect();
            let mut outcomes: Vec<(usize, Result<StackTable, ProfilingError>, u64)> = Vec::new();
            while let Some(joined) = join_set.join_next().await {
                if let Ok((idx, driver, result, duration_ms)) = joined {
                    slots[idx] = Some(driver);
                    outcomes.push((idx, result, duration_ms));
                }
            }
            (slots, outcomes)
        };
        let (system_table, (slots, mut outcomes)) = tokio::join!(perf_fut, drivers_fut);
        self.drivers = slots.into_iter().flatten().collect();
        outcomes.sort_by_key(|(idx, _, _)| *idx);

        let mut runtime_tables: Vec<StackTable> = Vec::new();
        for (idx, result, duration_ms) in outcomes {
            let name = self
                .drivers
                .get(idx)
                .map(RuntimeDriver::name)
                .unwrap_or("driver");
            match result {
                Ok(table) => {
                    self.emit_telemetry(CycleTelemetry {
                        cycle: cycle.0,
                        driver: name.to_string(),
                        status: DriverStatus::Ok,
                        duration_ms,
                        samples_emitted: table.total(),
                    });
                    runtime_tables.push(table);
                }
                Err(e) => {
                    match e.severity() {
                        Severity::Debug => debug!(driver = name, error = %e, "driver failed this cycle"),
                        Severity::Warn => warn!(driver = name, error = %e, "driver failed this cycle"),
                    }
                    self.emit_telemetry(CycleTelemetry {
                        cycle: cycle.0,
                        driver: name.to_string(),
                        status: DriverStatus::Failed {
                            error: e.to_string(),
                        },
                        duration_ms,
                        samples_emitted: 0,
                    });
                }
            }
        }

        let system_active = self.perf.is_active();
        self.emit_telemetry(CycleTelemetry {
            cycle: cycle.0,
            driver: "perf".to_string(),
            status: if system_active {
                DriverStatus::Ok
            } else {
                DriverStatus::Skipped {
                    reason: "no system profiler session".to_string(),
                }
            },
            duration_ms: perf_started.elapsed().as_millis() as u64,
            samples_emitted: system_table.total(),
        });

        let wall_end = Utc::now();
        merge_ctx.wall_end = wall_end;
        let snapshot = SnapshotResult {
            cycle,
            run: self.run_id.clone(),
            wall_start,
            wall_end,
            runtime_tables,
            system_table: system_active.then_some(system_table),
        };

        let (collapsed, stats) = merge(
            &snapshot.runtime_tables,
            snapshot.system_table.as_ref(),
            &merge_ctx,
        );
        info!(
            cycle = %cycle,
            lines = stats.lines,
            scaled_pids = stats.scaled_pids,
            system_pids = stats.system_pids,
            total_count = stats.total_count,
            "cycle merged"
        );

        for sink in &self.sinks {
            if let Err(e) = sink.submit(collapsed.as_bytes(), cycle).await {
                warn!(sink = sink.name(), error = %e, "profile submission failed, dropping cycle");
            }
        }

        // Release the big allocations before sweeping, so the reclaim
        // event reflects post-cycle steady state.
        drop(collapsed);
        drop(snapshot);
        self.memory.sweep(None);
        if self.memory.over_high_water() {
            warn!("resident set over high-water mark after sweep");
            self.memory.sweep(None);
        }

        self.cycle = self.cycle.next();
    }

    fn emit_telemetry(&self, telemetry: CycleTelemetry) {
        debug!(
            cycle = telemetry.cycle,
            driver = %telemetry.driver,
            status = ?telemetry.status,
            duration_ms = telemetry.duration_ms,
            samples = telemetry.samples_emitted,
            "driver cycle finished"
        );
        self.metrics.record(&telemetry);
    }

    /// Stop everything, best-effort, in order: signal, per-driver stops
    /// (each isolated), then one reclamation sweep. Idempotent.
    pub async fn shutdown(&mut self) {
        self.stop.stop();
        self.perf.stop().await;
        self.memory.sweep(None);
        info!(overruns = self.overruns, "profiling stopped");
    }
}

/// Build per-PID identities and the deduplicated metadata index.
fn build_identities(records: &[ProcessRecord], ctx: &mut MergeContext) {
    let mut idx_by_key: HashMap<String, usize> = HashMap::new();
    for record in records {
        let meta_idx = if record.runtime == RuntimeKind::Native
            || record.runtime == RuntimeKind::Unknown
        {
            strobe_core::merge::UNKNOWN_META_IDX
        } else {
            let key = format!(
                "{}|{}|{}",
                record.runtime,
                record.exe_path.display(),
                record.app_id.as_deref().unwrap_or("")
            );
            match idx_by_key.get(&key) {
                Some(idx) => *idx,
                None => {
                    let idx = ctx.push_metadata(serde_json::json!({
                        "runtime": record.runtime,
                        "exe": record.exe_path,
                        "app_id": record.app_id,
                    }));
                    idx_by_key.insert(key, idx);
                    idx
                }
            }
        };
        ctx.identities.insert(
            record.pid,
            ProcessIdentity {
                comm: record.comm.clone(),
                container: record.container_id.clone().unwrap_or_default(),
                app_id: record.app_id.clone().unwrap_or_default(),
                meta_idx,
            },
        );
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
