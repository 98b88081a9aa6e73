// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime classification and candidate validation.
//!
//! Classification runs in two passes. The first is cheap signals: shared
//! maps-scan hits for Java/Python/.NET plus executable and comm checks for
//! the rest. The second pass validates each candidate, discarding targets
//! that are too young to survive a profiling window, denylisted tools, and
//! embedded-runtime false positives (a process that maps interpreter
//! libraries without being the interpreter, e.g. a proxy embedding Python).

use std::path::Path;
use std::time::{Duration, SystemTime};

use regex::Regex;
use thiserror::Error;

use strobe_core::{ProcessRecord, ProfilingError, RuntimeKind};

/// Maps-scan pattern matching the JVM runtime library.
pub const JAVA_MAPS_PATTERN: &str = r"libjvm\.so";

/// Maps-scan pattern matching CPython: the interpreter library or native
/// extension modules installed under site/dist-packages.
pub const PYTHON_MAPS_PATTERN: &str =
    r"(libpython[0-9][^/]*\.so|/(site|dist)-packages/[^ ]+\.so)";

/// Maps-scan pattern matching the CoreCLR runtime library.
pub const DOTNET_MAPS_PATTERN: &str = r"libcoreclr\.so";

/// Default comm filter for PHP workers.
pub const DEFAULT_PHP_FILTER: &str = "php-fpm";

/// Commands never worth profiling, regardless of runtime.
pub const DEFAULT_DENYLIST: &[&str] = &["pip", "pip3", "conda", "gdb", "strobe"];

/// Which shared maps scans flagged a PID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapsHits {
    pub java: bool,
    pub python: bool,
    pub dotnet: bool,
}

/// Why a candidate was discarded by the validation pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("process is {age_s}s old, younger than the {min_s}s minimum")]
    TooYoung { age_s: u64, min_s: u64 },
    #[error("command {0} is denylisted")]
    Denylisted(String),
    #[error("maps a runtime it does not run")]
    Embedded,
}

/// Compiled-once classification rules.
#[derive(Debug)]
pub struct Classifier {
    ruby_exe: Regex,
    php_comm: Regex,
    denylist: Vec<String>,
}

fn basename(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

impl Classifier {
    /// Build a classifier; `php_filter` is the configurable PHP comm
    /// pattern (anchored as a substring match, like `pgrep`).
    pub fn new(php_filter: &str, extra_denylist: &[String]) -> Result<Self, ProfilingError> {
        let ruby_exe =
            Regex::new(r"/ruby[^/]*$").map_err(|e| ProfilingError::ConfigInvalid(e.to_string()))?;
        let php_comm = Regex::new(php_filter).map_err(|e| {
            ProfilingError::ConfigInvalid(format!("bad php filter {php_filter:?}: {e}"))
        })?;
        let mut denylist: Vec<String> = DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect();
        denylist.extend(extra_denylist.iter().cloned());
        Ok(Self {
            ruby_exe,
            php_comm,
            denylist,
        })
    }

    /// First-pass classification from cheap signals.
    pub fn classify(&self, exe: &Path, comm: &str, hits: MapsHits) -> RuntimeKind {
        if hits.java {
            return RuntimeKind::Java;
        }
        if hits.python {
            return RuntimeKind::Python;
        }
        let exe_str = exe.to_string_lossy();
        if self.ruby_exe.is_match(&exe_str) {
            return RuntimeKind::Ruby;
        }
        if self.php_comm.is_match(comm) {
            return RuntimeKind::Php;
        }
        if exe_str.ends_with("/dotnet") || hits.dotnet {
            return RuntimeKind::DotNet;
        }
        if basename(exe) == "node" {
            return RuntimeKind::NodeJs;
        }
        RuntimeKind::Native
    }

    /// Second-pass validation of a classified candidate.
    ///
    /// `read_maps` is only invoked for the embedded-runtime fallback, so
    /// the common case stays free of per-PID map reads.
    pub fn validate(
        &self,
        record: &ProcessRecord,
        now: SystemTime,
        min_age: Duration,
        read_maps: impl FnOnce() -> String,
    ) -> Result<(), Rejection> {
        let age = record.age(now);
        if age < min_age {
            return Err(Rejection::TooYoung {
                age_s: age.as_secs(),
                min_s: min_age.as_secs(),
            });
        }

        let exe_base = basename(&record.exe_path);
        let argv0_base = record
            .cmdline
            .first()
            .map(|a| {
                a.rsplit('/')
                    .next()
                    .unwrap_or(a)
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_string()
            })
            .unwrap_or_default();

        for deny in &self.denylist {
            if record.comm == *deny || exe_base == *deny || argv0_base == *deny {
                return Err(Rejection::Denylisted(deny.clone()));
            }
        }

        // Embedded-runtime rejection applies only to map-derived
        // classifications; the other runtimes were identified by their own
        // executable or comm already.
        let positively_named = match record.runtime {
            RuntimeKind::Java => {
                exe_base == "java" || argv0_base == "java"
            }
            RuntimeKind::Python => {
                exe_base.starts_with("python")
                    || argv0_base.starts_with("python")
                    || exe_base == "uwsgi"
                    || argv0_base == "uwsgi"
            }
            _ => return Ok(()),
        };
        if positively_named {
            return Ok(());
        }

        // Fallback: the canonical interpreter binary itself appearing in
        // the memory map (e.g. a renamed argv[0] but a real interpreter).
        let maps = read_maps();
        let canonical = match record.runtime {
            RuntimeKind::Java => "/bin/java",
            RuntimeKind::Python => "/bin/python",
            _ => return Ok(()),
        };
        if maps.lines().any(|line| line.contains(canonical)) {
            Ok(())
        } else {
            Err(Rejection::Embedded)
        }
    }
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
