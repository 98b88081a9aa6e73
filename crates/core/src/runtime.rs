// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Language runtimes and frame suffix tags.

use serde::{Deserialize, Serialize};

/// Language runtime a process was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Java,
    Python,
    Ruby,
    Php,
    DotNet,
    NodeJs,
    /// Compiled native code (including Go); covered by the system profiler.
    Native,
    Unknown,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Java => "java",
            RuntimeKind::Python => "python",
            RuntimeKind::Ruby => "ruby",
            RuntimeKind::Php => "php",
            RuntimeKind::DotNet => "dotnet",
            RuntimeKind::NodeJs => "nodejs",
            RuntimeKind::Native => "native",
            RuntimeKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin tag appended to a frame's symbol in collapsed output.
///
/// The Java tags arrive pre-attached from the JVM agent and pass through;
/// the remaining tags are attached by the drivers that own the frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSuffix {
    #[default]
    None,
    JavaJit,
    JavaInterp,
    JavaInlined,
    JavaC1,
    Python,
    PythonNative,
    Ruby,
    Php,
    DotNet,
    Kernel,
}

/// All non-empty suffix tags.
const TAGGED: &[(FrameSuffix, &str)] = &[
    (FrameSuffix::Php, "_[php]"),
    (FrameSuffix::PythonNative, "_[pn]"),
    (FrameSuffix::Ruby, "_[rb]"),
    (FrameSuffix::DotNet, "_[net]"),
    (FrameSuffix::Python, "_[p]"),
    (FrameSuffix::JavaJit, "_[j]"),
    (FrameSuffix::JavaInterp, "_[i]"),
    (FrameSuffix::JavaInlined, "_[0]"),
    (FrameSuffix::JavaC1, "_[1]"),
    (FrameSuffix::Kernel, "_[k]"),
];

impl FrameSuffix {
    /// The textual tag, empty for `None`.
    pub fn as_tag(&self) -> &'static str {
        TAGGED
            .iter()
            .find(|(s, _)| s == self)
            .map(|(_, t)| *t)
            .unwrap_or("")
    }

    /// Split a trailing suffix tag off a symbol, if present.
    pub fn strip(symbol: &str) -> (&str, FrameSuffix) {
        for (suffix, tag) in TAGGED {
            if let Some(stripped) = symbol.strip_suffix(tag) {
                return (stripped, *suffix);
            }
        }
        (symbol, FrameSuffix::None)
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
