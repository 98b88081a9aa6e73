// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use strobe_core::DriverStatus;

fn telemetry(driver: &str, cycle: u64) -> CycleTelemetry {
    CycleTelemetry {
        cycle,
        driver: driver.to_string(),
        status: DriverStatus::Ok,
        duration_ms: 1234,
        samples_emitted: 42,
    }
}

#[test]
fn records_are_appended_as_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics").join("cycles.jsonl");
    let metrics = CycleMetrics::new(path.clone());

    metrics.record(&telemetry("perf", 1));
    metrics.record(&telemetry("python", 1));

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(parsed["driver"], "perf");
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["samples_emitted"], 42);
}

#[test]
fn failed_status_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cycles.jsonl");
    let metrics = CycleMetrics::new(path.clone());
    metrics.record(&CycleTelemetry {
        cycle: 9,
        driver: "java".into(),
        status: DriverStatus::Failed {
            error: "spawn failed".into(),
        },
        duration_ms: 5,
        samples_emitted: 0,
    });
    let content = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
    assert_eq!(parsed["status"], "failed");
    assert_eq!(parsed["error"], "spawn failed");
}
