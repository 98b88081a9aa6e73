// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::UNIX_EPOCH;
use strobe_core::{Fingerprint, Frame, FrameSuffix};

fn record(pid: Pid, runtime: RuntimeKind, age_s: u64, now_s: u64) -> ProcessRecord {
    ProcessRecord {
        pid,
        comm: format!("proc-{pid}"),
        exe_path: PathBuf::from("/usr/bin/x"),
        cmdline: vec![],
        create_time: UNIX_EPOCH + Duration::from_secs(now_s - age_s),
        runtime,
        container_id: None,
        app_id: None,
    }
}

fn ctx_of(records: &[ProcessRecord], ranked: &[Pid]) -> CycleContext {
    CycleContext::new(
        records.to_vec(),
        ranked.to_vec(),
        UNIX_EPOCH + Duration::from_secs(10_000),
    )
}

#[test]
fn select_filters_runtime_and_age() {
    let records = vec![
        record(1, RuntimeKind::Python, 100, 10_000),
        record(2, RuntimeKind::Python, 3, 10_000), // too young
        record(3, RuntimeKind::Java, 100, 10_000), // wrong runtime
    ];
    let cfg = DriverConfig::default();
    let ctx = ctx_of(&records, &[]);
    let selected = select(&ctx, RuntimeKind::Python, &cfg);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].pid, 1);
}

#[test]
fn select_truncates_to_busiest() {
    let records: Vec<ProcessRecord> = (1..=6)
        .map(|pid| record(pid, RuntimeKind::Python, 100, 10_000))
        .collect();
    let cfg = DriverConfig {
        max_processes: 3,
        ..Default::default()
    };
    // Busiest-first ranking; pid 6 missing from the ranking sorts last.
    let ranked = [5, 3, 1, 2, 4];
    let ctx = ctx_of(&records, &ranked);
    let selected = select(&ctx, RuntimeKind::Python, &cfg);
    let pids: Vec<Pid> = selected.iter().map(|r| r.pid).collect();
    assert_eq!(pids, vec![5, 3, 1]);
}

#[test]
fn select_unlimited_when_cap_is_zero() {
    let records: Vec<ProcessRecord> = (1..=100)
        .map(|pid| record(pid, RuntimeKind::Ruby, 100, 10_000))
        .collect();
    let cfg = DriverConfig {
        max_processes: 0,
        ..Default::default()
    };
    let ctx = ctx_of(&records, &[]);
    let selected = select(&ctx, RuntimeKind::Ruby, &cfg);
    assert_eq!(selected.len(), 100);
}

fn one_stack(symbol: &str) -> PidSamples {
    let mut samples = PidSamples::new();
    samples.record(
        Fingerprint(vec![Frame::new(symbol, FrameSuffix::None)]),
        1,
    );
    samples
}

#[tokio::test]
async fn fan_out_collects_and_synthesizes_error_stacks() {
    let targets: Vec<ProcessRecord> = vec![
        record(1, RuntimeKind::Python, 100, 10_000),
        record(2, RuntimeKind::Python, 100, 10_000),
    ];
    let table = fan_out(targets, 4, |rec| async move {
        if rec.pid == 1 {
            Ok(one_stack("worked"))
        } else {
            Err(ProfilingError::ProcessGone { pid: rec.pid })
        }
    })
    .await
    .unwrap();

    assert_eq!(table.get(1).unwrap().total(), 1);
    let err_stacks: Vec<String> = table
        .get(2)
        .unwrap()
        .iter()
        .map(|(fp, _)| fp.render())
        .collect();
    assert_eq!(err_stacks, vec!["[error: process exited]".to_string()]);
    assert_eq!(table.comm(2), Some("proc-2"));
}

#[tokio::test]
async fn fan_out_session_error_aborts_driver() {
    let targets: Vec<ProcessRecord> = vec![
        record(1, RuntimeKind::Java, 100, 10_000),
        record(2, RuntimeKind::Java, 100, 10_000),
    ];
    let err = fan_out(targets, 2, |rec| async move {
        if rec.pid == 1 {
            Err(ProfilingError::SpawnFailed {
                program: "asprof".into(),
                reason: "not found".into(),
            })
        } else {
            Ok(one_stack("fine"))
        }
    })
    .await
    .unwrap_err();
    assert!(matches!(err, ProfilingError::SpawnFailed { .. }));
}

#[tokio::test]
async fn fan_out_respects_worker_cap() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let targets: Vec<ProcessRecord> = (1..=8)
        .map(|pid| record(pid, RuntimeKind::Php, 100, 10_000))
        .collect();

    let table = fan_out(targets, 2, {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        move |_rec| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(one_stack("s"))
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(table.pid_count(), 8);
    assert!(peak.load(Ordering::SeqCst) <= 2, "fan-out exceeded cap");
}

fn finished(wait_status: i32, stderr: &str) -> FinishedChild {
    FinishedChild {
        status: ExitStatus::from_raw(wait_status),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

#[yare::parameterized(
    gone = { "Error: no such process 1234", true },
    esrch = { "kill failed: ESRCH", true },
    exited = { "target process exited during attach", true },
)]
fn classify_process_gone(stderr: &str, expect_gone: bool) {
    let err = classify_failure(1234, &finished(1 << 8, stderr));
    assert_eq!(
        matches!(err, ProfilingError::ProcessGone { pid: 1234 }),
        expect_gone
    );
}

#[test]
fn classify_embedded_runtime() {
    let err = classify_failure(7, &finished(1 << 8, "Error: not a Python process"));
    assert!(matches!(err, ProfilingError::EmbeddedRuntime { pid: 7 }));
}

#[test]
fn classify_signal_death() {
    // Raw wait status 11 = killed by SIGSEGV.
    let err = classify_failure(7, &finished(11, ""));
    assert!(matches!(err, ProfilingError::ChildCrashed { ref reason } if reason.contains("11")));
}

#[test]
fn classify_plain_failure_keeps_first_line() {
    let err = classify_failure(7, &finished(2 << 8, "boom happened\ndetails follow"));
    assert!(
        matches!(err, ProfilingError::ChildCrashed { ref reason } if reason.contains("boom happened"))
    );
}

#[test]
fn child_timeout_includes_grace() {
    let cfg = DriverConfig {
        duration: Duration::from_secs(60),
        ..Default::default()
    };
    assert_eq!(cfg.child_timeout(), Duration::from_secs(70));
}
