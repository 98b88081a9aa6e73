// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};
use strobe_supervise::StopFlag;
use yare::parameterized;

#[parameterized(
    eleven_hz = { 11, 90_909_090 },
    hundred_hz = { 100, 10_000_000 },
    floor_at_1ms = { 5000, 1_000_000 },
    zero_is_clamped = { 0, 1_000_000_000 },
)]
fn interval_from_frequency(freq: u32, expected_ns: u64) {
    assert_eq!(interval_ns(freq), expected_ns);
}

#[test]
fn command_shape() {
    let cfg = DriverConfig {
        frequency: 11,
        duration: Duration::from_secs(60),
        ..Default::default()
    };
    let spec = command("asprof", &cfg, 4321, Path::new("/tmp/out/4321.collapsed"));
    assert_eq!(
        spec.display(),
        "asprof -d 60 -i 90909090 -o collapsed -f /tmp/out/4321.collapsed 4321"
    );
}

fn jvm_record(pid: i32) -> strobe_core::ProcessRecord {
    strobe_core::ProcessRecord {
        pid,
        comm: "java".into(),
        exe_path: PathBuf::from("/usr/bin/java"),
        cmdline: vec!["java".into(), "-jar".into(), "app.jar".into()],
        create_time: UNIX_EPOCH,
        runtime: RuntimeKind::Java,
        container_id: None,
        app_id: Some("java: app.jar".into()),
    }
}

fn ctx(records: &[strobe_core::ProcessRecord]) -> CycleContext {
    CycleContext::new(
        records.to_vec(),
        Vec::new(),
        UNIX_EPOCH + Duration::from_secs(100_000),
    )
}

#[tokio::test]
async fn disabled_mode_profiles_nothing() {
    let supervisor = Supervisor::new(StopFlag::new(), Duration::from_secs(1));
    let records = vec![jvm_record(10)];
    let mut driver = JavaDriver::new(DriverConfig::default(), JavaMode::Disabled, supervisor);
    let table = driver.snapshot(&ctx(&records)).await.unwrap();
    assert!(table.is_empty());
}

#[tokio::test]
async fn no_targets_is_empty_success() {
    let supervisor = Supervisor::new(StopFlag::new(), Duration::from_secs(1));
    let mut driver = JavaDriver::new(DriverConfig::default(), JavaMode::Ap, supervisor);
    let table = driver.snapshot(&ctx(&[])).await.unwrap();
    assert!(table.is_empty());
}

#[tokio::test]
async fn missing_launcher_is_a_session_error() {
    let supervisor = Supervisor::new(StopFlag::new(), Duration::from_secs(1));
    let records = vec![jvm_record(10)];
    let mut driver = JavaDriver::new(DriverConfig::default(), JavaMode::Ap, supervisor);
    driver.program = "/nonexistent/asprof".into();
    let err = driver.snapshot(&ctx(&records)).await.unwrap_err();
    assert!(matches!(err, ProfilingError::SpawnFailed { .. }));
}
