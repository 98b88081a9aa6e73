// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment variable overrides for agent paths and logging.

use std::path::PathBuf;

/// State directory: `$STROBE_STATE_DIR`, else `$XDG_STATE_HOME/strobe`,
/// else `~/.local/state/strobe`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STROBE_STATE_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::state_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("strobe")
}

/// Log filter: `$STROBE_LOG`, defaulting to `info`.
pub fn log_filter() -> String {
    std::env::var("STROBE_LOG").unwrap_or_else(|_| "info".to_string())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
