// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container identity and cgroup discovery.
//!
//! Two consumers: enumeration stamps each process record with its short
//! container id, and the system profiler can scope `perf record -G` to the
//! busiest container cgroups instead of sampling system-wide.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Which cgroup hierarchy the host mounts at `/sys/fs/cgroup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
}

/// Detect the mounted hierarchy: v2 exposes `cgroup.controllers` at the
/// mount root, v1 does not.
pub fn detect_version(cgroup_root: &Path) -> CgroupVersion {
    if cgroup_root.join("cgroup.controllers").exists() {
        CgroupVersion::V2
    } else {
        CgroupVersion::V1
    }
}

fn is_hex_id(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Extract a short (12-char) container id from `/proc/<pid>/cgroup`
/// content. Recognizes plain docker paths, systemd docker scopes, and the
/// containerd / cri-o scopes kubernetes uses.
pub fn container_id(cgroup_content: &str) -> Option<String> {
    for line in cgroup_content.lines() {
        // hierarchy-id:controllers:path
        let path = line.splitn(3, ':').nth(2)?;
        for segment in path.split('/') {
            let candidate = segment
                .strip_suffix(".scope")
                .map(|s| {
                    s.strip_prefix("docker-")
                        .or_else(|| s.strip_prefix("cri-containerd-"))
                        .or_else(|| s.strip_prefix("crio-"))
                        .unwrap_or(s)
                })
                .unwrap_or(segment);
            if is_hex_id(candidate) {
                return Some(candidate[..12].to_string());
            }
        }
    }
    None
}

/// One discovered container cgroup, with its cumulative CPU usage so
/// callers can rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCgroup {
    /// Path relative to the controller root, as `perf record -G` wants it.
    pub relative_path: String,
    pub cpu_usage: u64,
}

fn v1_cpu_usage(dir: &Path) -> u64 {
    fs::read_to_string(dir.join("cpuacct.usage"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

fn v2_cpu_usage(dir: &Path) -> u64 {
    fs::read_to_string(dir.join("cpu.stat"))
        .ok()
        .and_then(|s| {
            s.lines()
                .find_map(|line| line.strip_prefix("usage_usec "))
                .and_then(|rest| rest.trim().parse().ok())
        })
        .unwrap_or(0)
}

/// Enumerate docker container cgroups under `cgroup_root`, busiest first,
/// truncated to `max`.
pub fn docker_cgroups(cgroup_root: &Path, max: usize) -> Vec<ContainerCgroup> {
    let version = detect_version(cgroup_root);
    let (base, prefix): (PathBuf, &str) = match version {
        CgroupVersion::V1 => (cgroup_root.join("cpu").join("docker"), "docker/"),
        CgroupVersion::V2 => (cgroup_root.join("system.slice"), "system.slice/"),
    };

    let entries = match fs::read_dir(&base) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(base = %base.display(), error = %e, "no container cgroups found");
            return Vec::new();
        }
    };

    let mut found: Vec<ContainerCgroup> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let keep = match version {
                CgroupVersion::V1 => is_hex_id(&name),
                CgroupVersion::V2 => {
                    name.starts_with("docker-") && name.ends_with(".scope")
                }
            };
            if !keep || !entry.path().is_dir() {
                return None;
            }
            let cpu_usage = match version {
                CgroupVersion::V1 => v1_cpu_usage(&entry.path()),
                CgroupVersion::V2 => v2_cpu_usage(&entry.path()),
            };
            Some(ContainerCgroup {
                relative_path: format!("{prefix}{name}"),
                cpu_usage,
            })
        })
        .collect();

    found.sort_by(|a, b| {
        b.cpu_usage
            .cmp(&a.cpu_usage)
            .then_with(|| a.relative_path.cmp(&b.relative_path))
    });
    found.truncate(max);
    found
}

#[cfg(test)]
#[path = "cgroup_tests.rs"]
mod tests;
