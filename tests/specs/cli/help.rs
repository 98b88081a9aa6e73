//! CLI help and version output specs.

use crate::prelude::*;
use predicates::prelude::*;

#[test]
fn help_shows_usage_and_core_flags() {
    strobe()
        .args(&["--help"])
        .passes()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("--profiling-duration"))
        .stdout(predicate::str::contains("--perf-mode"))
        .stdout(predicate::str::contains("--python-mode"))
        .stdout(predicate::str::contains("--enable-heartbeat-server"))
        .stdout(predicate::str::contains("--processes-to-profile"));
}

#[test]
fn version_prints_name_and_semver() {
    strobe()
        .args(&["--version"])
        .passes()
        .stdout(predicate::str::starts_with("strobe "));
}

#[test]
fn unknown_flag_is_rejected() {
    strobe()
        .args(&["--no-such-flag"])
        .fails()
        .stderr(predicate::str::contains("--no-such-flag"));
}
