//! Dry-run specs: enumerate, print targets, exit clean.

use crate::prelude::*;

#[test]
fn dry_run_prints_processes_as_json() {
    let (assert, _state) = strobe().args(&["--dry-run"]).assert();
    let output = assert.success().get_output().stdout.clone();
    let parsed: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let records = parsed.as_array().unwrap();
    assert!(!records.is_empty(), "a live host has processes");

    // Our own test process must be in the scan.
    let me = std::process::id() as i64;
    assert!(
        records.iter().any(|r| r["pid"].as_i64() == Some(me)),
        "own pid missing from dry-run output"
    );
    let first = &records[0];
    assert!(first.get("comm").is_some());
    assert!(first.get("runtime").is_some());
}

#[test]
fn dry_run_with_explicit_pid_restricts_output() {
    let me = std::process::id().to_string();
    let (assert, _state) = strobe()
        .args(&["--dry-run", "--processes-to-profile", &me])
        .assert();
    let output = assert.success().get_output().stdout.clone();
    let parsed: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let records = parsed.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["pid"].as_u64(), Some(std::process::id() as u64));
}
