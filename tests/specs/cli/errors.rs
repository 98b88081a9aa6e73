//! Fatal configuration error specs: the only non-zero exits the agent has.

use crate::prelude::*;
use predicates::prelude::*;

#[test]
fn zero_frequency_is_fatal() {
    strobe()
        .args(&["-F", "0", "-o", "/tmp/p"])
        .fails()
        .stderr(predicate::str::contains("frequency"));
}

#[test]
fn zero_duration_is_fatal() {
    strobe()
        .args(&["-d", "0", "-o", "/tmp/p"])
        .fails()
        .stderr(predicate::str::contains("duration"));
}

#[test]
fn heartbeat_without_server_is_fatal() {
    strobe()
        .args(&["--enable-heartbeat-server"])
        .fails()
        .stderr(predicate::str::contains("--server-host"));
}

#[test]
fn server_without_token_is_fatal() {
    strobe()
        .args(&["--server-host", "https://api.example.com"])
        .fails()
        .stderr(predicate::str::contains("--token"));
}

#[test]
fn missing_destination_is_fatal() {
    strobe()
        .args(&["-c"])
        .fails()
        .stderr(predicate::str::contains("destination"));
}

#[test]
fn unsupported_profiling_mode_is_fatal() {
    strobe()
        .args(&["--profiling-mode", "allocation", "-o", "/tmp/p"])
        .fails()
        .stderr(predicate::str::contains("cpu"));
}

#[test]
fn bad_config_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "frequnecy = 11\n").unwrap();
    strobe()
        .args(&["--config", path.to_str().unwrap(), "-o", "/tmp/p"])
        .fails()
        .stderr(predicate::str::contains("config file"));
}
