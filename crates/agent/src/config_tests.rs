// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clap::Parser;

fn parse(args: &[&str]) -> Cli {
    let mut argv = vec!["strobe"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

fn load(args: &[&str]) -> Result<AgentConfig, ProfilingError> {
    AgentConfig::load(parse(args))
}

#[test]
fn defaults_with_output_dir() {
    let cfg = load(&["-o", "/tmp/profiles"]).unwrap();
    assert_eq!(cfg.duration, Duration::from_secs(60));
    assert_eq!(cfg.frequency, 11);
    assert_eq!(cfg.perf_mode, PerfMode::Fp);
    assert_eq!(cfg.python_mode, PythonMode::Auto);
    assert_eq!(cfg.java_mode, JavaMode::Ap);
    assert_eq!(cfg.max_processes, 50);
    assert_eq!(cfg.pyperf_skip_above, 100);
    assert_eq!(cfg.min_profiling_duration, Duration::from_secs(10));
    assert_eq!(cfg.mode, AgentMode::Once);
    assert!(cfg.application_identifiers);
    assert!(cfg.server.is_none());
}

#[test]
fn continuous_and_heartbeat_modes() {
    let cfg = load(&["-c", "-o", "/tmp/p"]).unwrap();
    assert_eq!(cfg.mode, AgentMode::Continuous);

    let cfg = load(&[
        "--enable-heartbeat-server",
        "--server-host",
        "https://api.example.com",
        "--token",
        "t0ken",
    ])
    .unwrap();
    assert_eq!(cfg.mode, AgentMode::Heartbeat);
    assert_eq!(cfg.server.unwrap().host, "https://api.example.com");
}

#[test]
fn heartbeat_requires_server() {
    let err = load(&["--enable-heartbeat-server"]).unwrap_err();
    assert!(matches!(err, ProfilingError::ConfigInvalid(_)));
}

#[test]
fn continuous_and_heartbeat_conflict() {
    let err = load(&[
        "-c",
        "--enable-heartbeat-server",
        "--server-host",
        "h",
        "--token",
        "t",
    ])
    .unwrap_err();
    assert!(matches!(err, ProfilingError::ConfigInvalid(_)));
}

#[test]
fn server_host_requires_token_and_vice_versa() {
    assert!(load(&["--server-host", "https://x"]).is_err());
    assert!(load(&["--token", "t", "-o", "/tmp/p"]).is_err());
}

#[test]
fn needs_some_destination() {
    let err = load(&["-c"]).unwrap_err();
    assert!(matches!(err, ProfilingError::ConfigInvalid(_)));
    // dry-run needs none
    assert!(load(&["--dry-run"]).is_ok());
}

#[yare::parameterized(
    zero_duration = { &["-d", "0", "-o", "/t"] },
    zero_frequency = { &["-F", "0", "-o", "/t"] },
    zero_pid = { &["--processes-to-profile", "0", "-o", "/t"] },
    alloc_mode = { &["--profiling-mode", "allocation", "-o", "/t"] },
)]
fn invalid_values_rejected(args: &[&str]) {
    assert!(load(args).is_err());
}

#[test]
fn cpu_profiling_mode_accepted() {
    assert!(load(&["--profiling-mode", "cpu", "-o", "/t"]).is_ok());
}

#[test]
fn explicit_pids_parse_csv() {
    let cfg = load(&["--processes-to-profile", "12,34,56", "-o", "/t"]).unwrap();
    assert_eq!(cfg.explicit_pids, Some(vec![12, 34, 56]));
}

#[test]
fn mode_enums_map_through() {
    let cfg = load(&[
        "--perf-mode",
        "smart",
        "--python-mode",
        "pyspy",
        "--java-mode",
        "disabled",
        "-o",
        "/t",
    ])
    .unwrap();
    assert_eq!(cfg.perf_mode, PerfMode::Smart);
    assert_eq!(cfg.python_mode, PythonMode::PySpy);
    assert_eq!(cfg.java_mode, JavaMode::Disabled);
}

#[test]
fn docker_container_cap_overrides_cgroup_cap() {
    let cfg = load(&[
        "--perf-use-cgroups",
        "--perf-max-cgroups",
        "7",
        "--perf-max-docker-containers",
        "3",
        "-o",
        "/t",
    ])
    .unwrap();
    assert!(cfg.perf_use_cgroups);
    assert_eq!(cfg.perf_max_cgroups, 3);
}

#[test]
fn config_file_fills_gaps_and_cli_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strobe.toml");
    std::fs::write(
        &path,
        r#"
frequency = 97
duration = 30
service_name = "payments"
deny_list = ["celery"]
"#,
    )
    .unwrap();

    let cfg = load(&[
        "--config",
        path.to_str().unwrap(),
        "-F",
        "55",
        "-o",
        "/t",
    ])
    .unwrap();
    assert_eq!(cfg.frequency, 55, "CLI flag must win over file");
    assert_eq!(cfg.duration, Duration::from_secs(30));
    assert_eq!(cfg.service_name, "payments");
    assert_eq!(cfg.extra_denylist, vec!["celery".to_string()]);
}

#[test]
fn unknown_config_file_keys_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strobe.toml");
    std::fs::write(&path, "frequnecy = 97\n").unwrap();
    let err = load(&["--config", path.to_str().unwrap(), "-o", "/t"]).unwrap_err();
    assert!(matches!(err, ProfilingError::ConfigInvalid(_)));
}

#[test]
fn derived_settings_propagate() {
    let cfg = load(&[
        "-d",
        "30",
        "-F",
        "22",
        "--skip-system-profilers-above",
        "1500",
        "--max-processes-runtime-profiler",
        "5",
        "-o",
        "/t",
    ])
    .unwrap();

    let driver = cfg.driver_config();
    assert_eq!(driver.duration, Duration::from_secs(30));
    assert_eq!(driver.frequency, 22);
    assert_eq!(driver.max_processes, 5);

    let perf = cfg.perf_settings();
    assert_eq!(perf.skip_system_profilers_above, 1500);
    assert_eq!(perf.frequency, 22);

    let scan = cfg.scan_config();
    assert_eq!(scan.min_profiling_duration, Duration::from_secs(10));
}
