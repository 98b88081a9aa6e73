// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::runtime::FrameSuffix;
use crate::stack::{Fingerprint, Frame};
use chrono::TimeZone;
use proptest::prelude::*;

fn ctx() -> MergeContext {
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap();
    let end = Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 0).single().unwrap();
    MergeContext::new(RunId::new("run-1"), CycleId(3), "0.1.0", "host-a", start, end)
}

fn stack(frames: &[&str]) -> Fingerprint {
    Fingerprint(frames.iter().map(|f| Frame::parse(f)).collect())
}

fn table_of(pid: Pid, stacks: &[(&[&str], u64)]) -> StackTable {
    let mut table = StackTable::new();
    for (frames, count) in stacks {
        table.record(pid, stack(frames), *count);
    }
    table
}

#[test]
fn header_only_when_empty() {
    let (out, stats) = merge(&[], None, &ctx());
    let mut lines = out.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with('#'));
    assert!(lines.next().is_none());
    assert_eq!(stats.lines, 0);

    let parsed: serde_json::Value = serde_json::from_str(&header[1..]).unwrap();
    assert_eq!(parsed["run_id"], "run-1");
    assert_eq!(parsed["cycle_id"], 3);
    assert_eq!(parsed["start_wall"], "2026-03-01T12:00:00+00:00");
    assert!(parsed["application_metadata"].is_array());
}

#[test]
fn runtime_pid_replaces_system_stacks() {
    let runtime = table_of(100, &[(&["jvm.Main.run_[j]"], 10)]);
    let mut system = table_of(100, &[(&["native_main"], 40)]);
    system.observe_comm(100, "java");

    let (out, stats) = merge(&[runtime], Some(&system), &ctx());
    assert_eq!(stats.scaled_pids, 1);
    assert_eq!(stats.system_pids, 0);
    // Runtime stack scaled 10 -> 40; the raw system stack is gone.
    assert!(out.contains("jvm.Main.run_[j] 40"));
    assert!(!out.contains("native_main 40"));
}

#[test]
fn scaling_minimum_is_one() {
    // ratio = 2/1000; every stack must still be emitted with count >= 1
    let runtime = table_of(5, &[(&["a"], 999), (&["b"], 1)]);
    let system = table_of(5, &[(&["sys"], 2)]);
    let (out, _) = merge(&[runtime], Some(&system), &ctx());
    assert!(out.contains(";b 1"));
    assert!(out.contains(";a 2"));
}

#[test]
fn system_only_pid_is_verbatim() {
    let mut system = table_of(7, &[(&["main", "do_io_[k]"], 13)]);
    system.observe_comm(7, "nginx");
    let (out, stats) = merge(&[], Some(&system), &ctx());
    assert_eq!(stats.system_pids, 1);
    assert!(out.contains("0;;nginx;;main;do_io_[k] 13"));
}

#[test]
fn no_system_table_emits_runtime_unscaled() {
    let runtime = table_of(9, &[(&["py_[p]"], 21)]);
    let (out, stats) = merge(&[runtime], None, &ctx());
    assert_eq!(stats.unscaled_pids, 1);
    assert!(out.contains("py_[p] 21"));
}

#[test]
fn identity_prefix_is_used_when_known() {
    let mut context = ctx();
    let idx = context.push_metadata(serde_json::json!({"exe": "/usr/bin/python3"}));
    context.identities.insert(
        11,
        ProcessIdentity {
            comm: "gunicorn".into(),
            container: "abc123def456".into(),
            app_id: "web".into(),
            meta_idx: idx,
        },
    );
    let runtime = table_of(11, &[(&["handler_[p]"], 4)]);
    let (out, _) = merge(&[runtime], None, &context);
    assert!(out.contains(&format!("{idx};abc123def456;gunicorn;web;handler_[p] 4")));
}

#[test]
fn duplicate_pid_across_runtime_tables_first_wins() {
    let first = table_of(30, &[(&["from_first"], 2)]);
    let second = table_of(30, &[(&["from_second"], 9)]);
    let (out, _) = merge(&[first, second], None, &ctx());
    assert!(out.contains("from_first 2"));
    assert!(!out.contains("from_second"));
}

#[test]
fn output_lines_are_sorted_for_stable_goldens() {
    let runtime = table_of(1, &[(&["zzz"], 1), (&["aaa"], 1), (&["mmm"], 1)]);
    let (out, _) = merge(&[runtime], None, &ctx());
    let body: Vec<&str> = out.lines().skip(1).collect();
    let mut sorted = body.clone();
    sorted.sort_unstable();
    assert_eq!(body, sorted);
}

#[test]
fn suffix_frame_with_kernel_passthrough() {
    let mut system = StackTable::new();
    system.record(
        2,
        Fingerprint(vec![
            Frame::new("main", FrameSuffix::None),
            Frame::new("vfs_read", FrameSuffix::Kernel),
        ]),
        6,
    );
    let (out, _) = merge(&[], Some(&system), &ctx());
    assert!(out.contains("main;vfs_read_[k] 6"));
}

proptest! {
    /// Scaling law: when both totals are non-zero, the emitted total for a
    /// PID equals the system total within one rounding step per stack.
    #[test]
    fn scaling_law_holds(
        counts in prop::collection::vec(1u64..5_000, 1..40),
        system_total in 1u64..100_000,
    ) {
        let mut runtime = StackTable::new();
        for (i, count) in counts.iter().enumerate() {
            runtime.record(77, stack(&[&format!("f{i}")]), *count);
        }
        let system = table_of(77, &[(&["sys"], system_total)]);

        let (out, stats) = merge(&[runtime], Some(&system), &ctx());
        prop_assert_eq!(stats.scaled_pids, 1);

        let emitted: u64 = out
            .lines()
            .skip(1)
            .filter_map(|l| l.rsplit_once(' '))
            .map(|(_, n)| n.parse::<u64>().unwrap())
            .sum();

        let stacks = counts.len() as u64;
        if system_total >= stacks {
            let diff = emitted.abs_diff(system_total);
            prop_assert!(
                diff <= stacks,
                "emitted {} vs system {} (stacks {})",
                emitted, system_total, stacks
            );
        } else {
            // Minimum-1 clamping dominates: every stack emits at least once.
            prop_assert!(emitted >= stacks);
            prop_assert!(emitted <= stacks + system_total);
        }
    }
}
