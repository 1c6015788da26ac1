//! Test utilities for kettle unit tests.
//!
//! [`FakeRunner`] stands in for real child processes: it answers commands
//! from scripted expectations and records every invocation (arguments,
//! environment, working directory) so tests can assert on ordering and on
//! exactly what an external build step would have seen.
//!
//! # Example
//!
//! ```rust,ignore
//! let runner = FakeRunner::new()
//!     .with_executable("gfortran", "/usr/bin/gfortran")
//!     .on("/usr/bin/gfortran -dumpversion", ProcessOutput::ok("15.1.0"));
//! ```

pub mod fixtures;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Result};

use crate::util::process::{ProcessBuilder, ProcessOutput, ProcessRunner};

pub use fixtures::*;

impl ProcessOutput {
    /// A successful exit with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        ProcessOutput {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
            timed_out: false,
        }
    }

    /// A failing exit with the given stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        ProcessOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
            timed_out: false,
        }
    }

    /// A process killed for running past its timeout.
    pub fn killed_by_timeout(stdout: impl Into<String>) -> Self {
        ProcessOutput {
            code: None,
            stdout: stdout.into(),
            stderr: String::new(),
            timed_out: true,
        }
    }
}

/// Pattern for matching commands in [`FakeRunner`].
#[derive(Debug, Clone)]
pub enum CommandPattern {
    /// Exact match on full command string.
    Exact(String),
    /// Match if command starts with prefix.
    StartsWith(String),
    /// Match if command contains substring.
    Contains(String),
}

impl CommandPattern {
    /// Check if this pattern matches the given command.
    pub fn matches(&self, cmd: &str) -> bool {
        match self {
            CommandPattern::Exact(s) => cmd == s,
            CommandPattern::StartsWith(s) => cmd.starts_with(s.as_str()),
            CommandPattern::Contains(s) => cmd.contains(s.as_str()),
        }
    }
}

/// One invocation seen by the fake runner.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Rendered command line
    pub command: String,
    /// Environment overlay passed to the process
    pub env: BTreeMap<String, String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
}

/// Scripted [`ProcessRunner`].
///
/// Commands with no matching expectation fail with "unexpected command"
/// unless a default output was set.
#[derive(Debug, Default)]
pub struct FakeRunner {
    executables: BTreeMap<String, PathBuf>,
    expectations: Vec<(CommandPattern, ProcessOutput)>,
    default_output: Option<ProcessOutput>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeRunner {
    /// Create a runner that knows no executables and no commands.
    pub fn new() -> Self {
        FakeRunner::default()
    }

    /// Make `name` discoverable at `path`.
    pub fn with_executable(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.executables.insert(name.into(), path.into());
        self
    }

    /// Answer an exact command line.
    pub fn on(mut self, cmd: impl Into<String>, output: ProcessOutput) -> Self {
        self.expectations
            .push((CommandPattern::Exact(cmd.into()), output));
        self
    }

    /// Answer any command line starting with `prefix`.
    pub fn on_prefix(mut self, prefix: impl Into<String>, output: ProcessOutput) -> Self {
        self.expectations
            .push((CommandPattern::StartsWith(prefix.into()), output));
        self
    }

    /// Answer any command line containing `needle`.
    pub fn on_contains(mut self, needle: impl Into<String>, output: ProcessOutput) -> Self {
        self.expectations
            .push((CommandPattern::Contains(needle.into()), output));
        self
    }

    /// Output for commands that match no expectation.
    pub fn with_default(mut self, output: ProcessOutput) -> Self {
        self.default_output = Some(output);
        self
    }

    /// All recorded invocations, in order.
    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// All recorded command lines, in order.
    pub fn calls(&self) -> Vec<String> {
        self.recorded().into_iter().map(|c| c.command).collect()
    }

    /// Whether any recorded command line contains `needle`.
    pub fn called(&self, needle: &str) -> bool {
        self.calls().iter().any(|c| c.contains(needle))
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, cmd: &ProcessBuilder) -> Result<ProcessOutput> {
        let command = cmd.display_command();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                command: command.clone(),
                env: cmd.get_env().clone(),
                cwd: cmd.get_cwd().map(PathBuf::from),
            });
        }

        for (pattern, output) in &self.expectations {
            if pattern.matches(&command) {
                return Ok(output.clone());
            }
        }

        if let Some(ref default) = self.default_output {
            return Ok(default.clone());
        }

        bail!("unexpected command: {}", command)
    }

    fn find_executable(&self, name: &str, _extra_paths: &[PathBuf]) -> Option<PathBuf> {
        self.executables.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_runner_matches_in_order() {
        let runner = FakeRunner::new()
            .on("make -j4", ProcessOutput::failed(2, "make: *** [all] Error 1"))
            .on_prefix("make", ProcessOutput::ok(""));

        let out = runner.run(&ProcessBuilder::new("make").arg("-j4")).unwrap();
        assert_eq!(out.code, Some(2));

        let out = runner.run(&ProcessBuilder::new("make").arg("install")).unwrap();
        assert!(out.success());

        assert_eq!(runner.calls(), vec!["make -j4", "make install"]);
    }

    #[test]
    fn test_unexpected_command_fails() {
        let runner = FakeRunner::new();
        assert!(runner.run(&ProcessBuilder::new("autoreconf")).is_err());
        assert!(runner.called("autoreconf"));
    }

    #[test]
    fn test_records_env_and_cwd() {
        let runner = FakeRunner::new().with_default(ProcessOutput::ok(""));
        runner
            .run(
                &ProcessBuilder::new("./configure")
                    .env("FC", "mpif90")
                    .cwd("/tmp/src"),
            )
            .unwrap();

        let call = &runner.recorded()[0];
        assert_eq!(call.env["FC"], "mpif90");
        assert_eq!(call.cwd, Some(PathBuf::from("/tmp/src")));
    }
}
