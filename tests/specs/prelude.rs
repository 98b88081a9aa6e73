//! Test helpers for behavioral specifications.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use assert_cmd::Command;
use tempfile::TempDir;

/// A strobe invocation with an isolated state directory, so parallel
/// specs never contend on the instance lock.
pub struct Strobe {
    pub state: TempDir,
    cmd: Command,
}

pub fn strobe() -> Strobe {
    let state = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("strobe").unwrap();
    cmd.env("STROBE_STATE_DIR", state.path());
    cmd.env("STROBE_LOG", "warn");
    Strobe { state, cmd }
}

impl Strobe {
    pub fn args(mut self, args: &[&str]) -> Self {
        self.cmd.args(args);
        self
    }

    pub fn assert(mut self) -> (assert_cmd::assert::Assert, TempDir) {
        (self.cmd.assert(), self.state)
    }

    pub fn passes(mut self) -> assert_cmd::assert::Assert {
        self.cmd.assert().success()
    }

    pub fn fails(mut self) -> assert_cmd::assert::Assert {
        self.cmd.assert().failure()
    }
}
