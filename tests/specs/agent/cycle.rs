//! Single-cycle specs: the default mode profiles once and exits zero.

use crate::prelude::*;
use predicates::prelude::*;

#[test]
fn single_cycle_writes_well_formed_profile() {
    let out = tempfile::tempdir().unwrap();
    strobe()
        .args(&[
            "-d",
            "1",
            "-o",
            out.path().to_str().unwrap(),
            "--perf-mode",
            "disabled",
            "--python-mode",
            "disabled",
            "--java-mode",
            "disabled",
        ])
        .passes();

    let content = std::fs::read_to_string(out.path().join("profile_1.col")).unwrap();
    let header = content.lines().next().unwrap();
    assert!(header.starts_with('#'));
    let parsed: serde_json::Value = serde_json::from_str(&header[1..]).unwrap();
    assert_eq!(parsed["cycle_id"], 1);
    assert!(parsed["application_metadata"].is_array());
}

#[test]
fn second_instance_is_locked_out() {
    // Same state dir for both: the second must refuse to start.
    let out = tempfile::tempdir().unwrap();
    let first = strobe().args(&[
        "-d",
        "1",
        "-o",
        out.path().to_str().unwrap(),
        "--perf-mode",
        "disabled",
        "--python-mode",
        "disabled",
        "--java-mode",
        "disabled",
    ]);

    let state_path = first.state.path().to_path_buf();
    // Hold the lock ourselves to simulate a running agent.
    let lock_path = state_path.join("strobe.pid");
    std::fs::create_dir_all(&state_path).unwrap();
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .unwrap();
    fs2::FileExt::try_lock_exclusive(&lock_file).unwrap();

    first
        .fails()
        .stderr(predicate::str::contains("already running"));
}
