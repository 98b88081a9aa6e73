// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Argv and pipe-policy description of a child process to spawn.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

/// What to do with one of a child's standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipeMode {
    /// Connect to `/dev/null`.
    #[default]
    Null,
    /// Parent-owned pipe, collected by the supervisor.
    Piped,
}

impl PipeMode {
    fn stdio(self) -> Stdio {
        match self {
            PipeMode::Null => Stdio::null(),
            PipeMode::Piped => Stdio::piped(),
        }
    }
}

/// Builder for a supervised child process.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    stdout: PipeMode,
    stderr: PipeMode,
}

impl CommandSpec {
    /// New spec with both output streams piped and stdin closed.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
            stdout: PipeMode::Piped,
            stderr: PipeMode::Piped,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.envs.push((key.into(), val.into()));
        self
    }

    pub fn cwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.cwd = Some(path.into());
        self
    }

    pub fn stdout(mut self, mode: PipeMode) -> Self {
        self.stdout = mode;
        self
    }

    pub fn stderr(mut self, mode: PipeMode) -> Self {
        self.stderr = mode;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// `program arg1 arg2 …` for logs and error messages.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }

    pub(crate) fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(self.stdout.stdio())
            .stderr(self.stderr.stdio())
            .kill_on_drop(true);
        for (key, val) in &self.envs {
            cmd.env(key, val);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
