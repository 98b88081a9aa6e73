// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use strobe_core::{Fingerprint, Frame, FrameSuffix, PidSamples};
use strobe_supervise::StopFlag;

fn supervisor() -> Supervisor {
    Supervisor::new(StopFlag::new(), Duration::from_millis(200))
}

fn driver(settings: PerfSettings) -> PerfDriver {
    PerfDriver::new(settings, supervisor())
}

#[test]
fn switch_every_depends_on_frequency() {
    let low = PerfSettings {
        frequency: 11,
        duration: Duration::from_secs(60),
        ..Default::default()
    };
    assert_eq!(low.switch_every(), Duration::from_secs(90));

    let high = PerfSettings {
        frequency: 99,
        duration: Duration::from_secs(60),
        ..Default::default()
    };
    assert_eq!(high.switch_every(), Duration::from_secs(180));
}

#[test]
fn record_command_fp_system_wide() {
    let d = driver(PerfSettings {
        frequency: 11,
        duration: Duration::from_secs(60),
        ..Default::default()
    });
    let spec = d.record_command(Unwind::Fp, Path::new("/rot/fp"));
    assert_eq!(
        spec.display(),
        "perf record -F 11 -g -a --switch-output=90s -o /rot/fp/perf.data"
    );
}

#[test]
fn record_command_dwarf_with_event_and_cgroups() {
    let mut d = driver(PerfSettings {
        frequency: 11,
        duration: Duration::from_secs(60),
        dwarf_stack_size: 4096,
        ..Default::default()
    });
    d.event_args = Some(vec!["-e".into(), "cpu-clock".into()]);
    d.scope = PerfScope::Cgroups(vec!["docker/aaa".into(), "docker/bbb".into()]);
    let spec = d.record_command(Unwind::Dwarf, Path::new("/rot/dwarf"));
    assert_eq!(
        spec.display(),
        "perf record -F 11 --call-graph dwarf,4096 -e cpu-clock -G docker/aaa,docker/bbb --switch-output=90s -o /rot/dwarf/perf.data"
    );
}

#[tokio::test]
async fn disabled_mode_never_starts() {
    let mut d = driver(PerfSettings {
        mode: PerfMode::Disabled,
        ..Default::default()
    });
    d.start(10).await.unwrap();
    assert!(!d.is_active());
    assert!(d.snapshot(None).await.is_empty());
}

#[tokio::test]
async fn process_count_gate_suppresses_start() {
    let mut d = driver(PerfSettings {
        skip_system_profilers_above: 100,
        ..Default::default()
    });
    d.start(101).await.unwrap();
    assert!(!d.is_active(), "gate must prevent the session entirely");
}

#[test]
fn rotation_discovery_and_pruning() {
    let dir = tempfile::tempdir().unwrap();
    let touch = |name: &str| std::fs::write(dir.path().join(name), b"x").unwrap();
    touch("perf.data"); // open batch, never eligible
    touch("perf.data.2026030112000001");
    touch("perf.data.2026030112000002");
    touch("perf.data.2026030112000003");

    let newest = newest_rotation(dir.path(), None).unwrap();
    assert!(newest.ends_with("perf.data.2026030112000003"));

    // Nothing newer than what we already consumed.
    assert_eq!(
        newest_rotation(dir.path(), Some("perf.data.2026030112000003")),
        None
    );

    prune_rotations(dir.path(), &newest);
    let remaining: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    // Consumed and older rotations are gone; the open batch stays.
    assert!(remaining.contains(&"perf.data".to_string()));
    assert!(!remaining.iter().any(|n| n.starts_with("perf.data.2026")));
}

fn samples_of_depth(depth: usize, count: u64) -> PidSamples {
    let mut samples = PidSamples::new();
    let frames: Vec<Frame> = (0..depth)
        .map(|i| Frame::new(format!("f{i}"), FrameSuffix::None))
        .collect();
    samples.record(Fingerprint(frames), count);
    samples
}

#[test]
fn choose_best_picks_deeper_stacks_per_pid() {
    let mut fp = StackTable::new();
    fp.insert_pid(1, samples_of_depth(8, 5)); // deeper for pid 1
    fp.insert_pid(2, samples_of_depth(2, 5));
    fp.observe_comm(1, "deep-fp");

    let mut dwarf = StackTable::new();
    dwarf.insert_pid(1, samples_of_depth(3, 5));
    dwarf.insert_pid(2, samples_of_depth(6, 5)); // deeper for pid 2
    dwarf.insert_pid(3, samples_of_depth(4, 1)); // only in dwarf

    let best = choose_best(vec![(Unwind::Fp, fp), (Unwind::Dwarf, dwarf)]);
    assert_eq!(best.get(1).unwrap().mean_depth(), 8.0);
    assert_eq!(best.get(2).unwrap().mean_depth(), 6.0);
    assert_eq!(best.get(3).unwrap().mean_depth(), 4.0);
    assert_eq!(best.comm(1), Some("deep-fp"));
}

#[test]
fn choose_best_tie_prefers_dwarf() {
    let mut fp = StackTable::new();
    fp.insert_pid(1, samples_of_depth(4, 1));
    let mut dwarf = StackTable::new();
    let mut tagged = PidSamples::new();
    tagged.record(
        Fingerprint(vec![
            Frame::new("a", FrameSuffix::None),
            Frame::new("b", FrameSuffix::None),
            Frame::new("c", FrameSuffix::None),
            Frame::new("dwarf_marker", FrameSuffix::None),
        ]),
        1,
    );
    dwarf.insert_pid(1, tagged);

    let best = choose_best(vec![(Unwind::Fp, fp), (Unwind::Dwarf, dwarf)]);
    let rendered: Vec<String> = best.get(1).unwrap().iter().map(|(fp, _)| fp.render()).collect();
    assert_eq!(rendered, vec!["a;b;c;dwarf_marker".to_string()]);
}

#[test]
fn choose_best_single_table_passthrough() {
    let mut fp = StackTable::new();
    fp.insert_pid(9, samples_of_depth(1, 2));
    let best = choose_best(vec![(Unwind::Fp, fp)]);
    assert_eq!(best.get(9).unwrap().total(), 2);
    assert!(choose_best(Vec::new()).is_empty());
}

#[test]
fn rss_parses_proc_status() {
    let root = tempfile::tempdir().unwrap();
    let pid_dir = root.path().join("4242");
    std::fs::create_dir_all(&pid_dir).unwrap();
    std::fs::write(
        pid_dir.join("status"),
        "Name:\tperf\nVmPeak:\t  300000 kB\nVmRSS:\t  204800 kB\n",
    )
    .unwrap();
    assert_eq!(rss_bytes(root.path(), 4242), Some(204_800 * 1024));
    assert_eq!(rss_bytes(root.path(), 1), None);
}
