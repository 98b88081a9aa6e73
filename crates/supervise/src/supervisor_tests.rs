// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::command::PipeMode;
use serial_test::serial;

fn supervisor() -> Supervisor {
    Supervisor::new(StopFlag::new(), Duration::from_millis(200))
}

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh").arg("-c").arg(script)
}

fn open_fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn wait_output_collects_streams() {
    let sup = supervisor();
    let handle = sup.spawn(&sh("echo out; echo err >&2")).unwrap();
    let finished = sup
        .wait_output(handle, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(finished.success());
    assert_eq!(finished.stdout_text(), "out\n");
    assert_eq!(finished.stderr_text(), "err\n");
    assert_eq!(sup.live_count(), 0);
}

#[tokio::test]
async fn spawn_missing_binary_fails() {
    let sup = supervisor();
    let err = sup
        .spawn(&CommandSpec::new("/nonexistent/profiler-binary"))
        .unwrap_err();
    assert!(matches!(err, ProfilingError::SpawnFailed { .. }));
    assert_eq!(sup.live_count(), 0);
}

#[tokio::test]
async fn timeout_kills_and_removes_handle() {
    let sup = supervisor();
    let handle = sup.spawn(&sh("sleep 30")).unwrap();
    let start = Instant::now();
    let err = sup
        .wait_output(handle, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ProfilingError::ChildTimeout { .. }));
    // Timeout + grace, far below the sleep duration.
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(sup.live_count(), 0);
}

#[tokio::test]
async fn stop_request_cancels_wait() {
    let stop = StopFlag::new();
    let sup = Supervisor::new(stop.clone(), Duration::from_millis(200));
    let handle = sup.spawn(&sh("sleep 30")).unwrap();

    let waiter = sup.clone();
    let task = tokio::spawn(async move { waiter.wait_output(handle, Duration::from_secs(60)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.stop();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, ProfilingError::Cancelled));
    assert_eq!(sup.live_count(), 0);
}

#[tokio::test]
async fn concurrent_waiters_race_cleanly() {
    let sup = supervisor();
    let handle = sup.spawn(&sh("sleep 0.2")).unwrap();
    let (a, b) = tokio::join!(
        sup.wait_output(handle, Duration::from_secs(5)),
        sup.wait_output(handle, Duration::from_secs(5)),
    );
    let raced = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(ProfilingError::ReapRace)))
        .count();
    assert_eq!(raced, 1, "exactly one waiter must lose the race");
    assert_eq!(sup.live_count(), 0);
}

#[tokio::test]
async fn reap_completed_closes_pipes_of_exited_children() {
    let sup = supervisor();
    for _ in 0..3 {
        sup.spawn(&sh("echo done")).unwrap();
    }
    // Let the children exit without awaiting them.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stats = sup.reap_completed();
    assert_eq!(stats.scanned, 3);
    assert_eq!(stats.reaped, 3);
    assert_eq!(stats.pipes_closed, 6);
    assert_eq!(sup.live_count(), 0);

    // A second sweep is a no-op.
    let again = sup.reap_completed();
    assert_eq!(again.reaped, 0);
    assert_eq!(again.scanned, 0);
}

#[tokio::test]
async fn reap_skips_running_children() {
    let sup = supervisor();
    let handle = sup.spawn(&sh("sleep 5")).unwrap();
    let stats = sup.reap_completed();
    assert_eq!(stats.scanned, 1);
    assert_eq!(stats.reaped, 0);
    assert_eq!(sup.live_count(), 1);
    sup.terminate(handle).await.unwrap();
    assert_eq!(sup.live_count(), 0);
}

#[tokio::test]
async fn terminate_is_idempotent() {
    let sup = supervisor();
    let handle = sup.spawn(&sh("sleep 5")).unwrap();
    sup.terminate(handle).await.unwrap();
    sup.terminate(handle).await.unwrap();
    assert_eq!(sup.live_count(), 0);
}

/// First-ever child spawn sets up process-global signal plumbing that owns
/// an fd for the rest of the process; take baselines after it exists.
async fn warm_up(sup: &Supervisor) {
    let handle = sup.spawn(&sh("true")).unwrap();
    sup.wait_output(handle, Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
#[serial]
async fn fd_count_returns_to_baseline_after_sweep() {
    let sup = supervisor();
    warm_up(&sup).await;
    let baseline = open_fd_count();

    let mut handles = Vec::new();
    for _ in 0..5 {
        handles.push(sup.spawn(&sh("echo leak-check")).unwrap());
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(open_fd_count() > baseline, "children must hold pipe fds");

    sup.reap_completed();
    assert_eq!(open_fd_count(), baseline);
}

#[tokio::test]
#[serial]
async fn fd_count_returns_to_baseline_after_awaits() {
    let sup = supervisor();
    warm_up(&sup).await;
    let baseline = open_fd_count();
    for _ in 0..5 {
        let handle = sup.spawn(&sh("true")).unwrap();
        sup.wait_output(handle, Duration::from_secs(5)).await.unwrap();
    }
    assert_eq!(open_fd_count(), baseline);
}

#[tokio::test]
async fn null_streams_collect_empty_output() {
    let sup = supervisor();
    let spec = sh("echo ignored").stdout(PipeMode::Null).stderr(PipeMode::Null);
    let handle = sup.spawn(&spec).unwrap();
    let finished = sup
        .wait_output(handle, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(finished.success());
    assert!(finished.stdout.is_empty());
    assert!(finished.stderr.is_empty());
}
