//! Regression verification of an installed package.
//!
//! Installed fixtures are read-only, and drivers write their output next to
//! their inputs, so [`stage_writable`] first copies them into a scratch
//! directory. [`VerificationRunner::verify`] then runs every case from there.
//!
//! Unlike the build pipeline this is not fail-fast: every case runs and
//! reports its own outcome.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tempfile::{NamedTempFile, TempDir};

use crate::builder::events::{ignore_events, EventSink, InstallEvent};
use crate::core::error::RecipeError;
use crate::core::recipe::VerificationCase;
use crate::util::diagnostic::{suggestions, Diagnostic};
use crate::util::fs::copy_dir_all;
use crate::util::process::{ProcessBuilder, ProcessRunner};

/// Outcome of one verification case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CaseOutcome {
    Pass,
    Fail {
        exit_code: Option<i32>,
        output: String,
    },
    /// Killed after running past the case timeout
    TimedOut { output: String },
}

impl CaseOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, CaseOutcome::Pass)
    }

    /// Short status name, as used in events.
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseOutcome::Pass => "pass",
            CaseOutcome::Fail { .. } => "fail",
            CaseOutcome::TimedOut { .. } => "timed-out",
        }
    }

    /// Captured driver output, if the case did not pass.
    pub fn output(&self) -> Option<&str> {
        match self {
            CaseOutcome::Pass => None,
            CaseOutcome::Fail { output, .. } | CaseOutcome::TimedOut { output } => Some(output),
        }
    }
}

/// Result of a single case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub outcome: CaseOutcome,

    /// Wall time of the driver (in milliseconds for JSON)
    #[serde(serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
}

fn serialize_duration_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Aggregated result of a verification pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    /// Results keyed by case label
    pub cases: BTreeMap<String, CaseResult>,

    /// Total verification time (in milliseconds for JSON)
    #[serde(serialize_with = "serialize_duration_ms")]
    pub total_duration: Duration,
}

impl VerifyReport {
    /// The run succeeds only if every case passed.
    pub fn passed(&self) -> bool {
        self.cases.values().all(|c| c.outcome.is_pass())
    }

    pub fn passed_count(&self) -> usize {
        self.cases.values().filter(|c| c.outcome.is_pass()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.cases.len() - self.passed_count()
    }

    /// Warning listing the failed cases, or `None` when every case passed.
    ///
    /// A failed case never undoes the install, so this is not an error.
    pub fn to_diagnostic(&self) -> Option<Diagnostic> {
        if self.passed() {
            return None;
        }

        let mut diag = Diagnostic::warning(format!(
            "{} of {} verification case(s) failed",
            self.failed_count(),
            self.cases.len()
        ));
        for (label, result) in &self.cases {
            let detail = match result.outcome {
                CaseOutcome::Pass => continue,
                CaseOutcome::Fail {
                    exit_code: Some(code),
                    ..
                } => format!("{}: exit code {}", label, code),
                CaseOutcome::Fail {
                    exit_code: None, ..
                } => format!("{}: did not exit normally", label),
                CaseOutcome::TimedOut { .. } => format!("{}: timed out", label),
            };
            diag = diag.with_context(detail);
        }
        Some(diag.with_suggestion(suggestions::VERIFY_FAILED))
    }

    /// Outcome per label.
    pub fn outcomes(&self) -> BTreeMap<&str, &CaseOutcome> {
        self.cases
            .iter()
            .map(|(label, result)| (label.as_str(), &result.outcome))
            .collect()
    }
}

/// Fixtures copied to a writable scratch directory.
///
/// The directory is removed on drop unless [`StagedFixtures::keep`] is called.
#[derive(Debug)]
pub struct StagedFixtures {
    dir: TempDir,
    root: PathBuf,
}

impl StagedFixtures {
    /// Directory the drivers run in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keep the scratch directory on disk and return the staged root.
    pub fn keep(self) -> PathBuf {
        let _ = self.dir.keep();
        self.root
    }
}

/// Copy `share_dir/<subdir>` into a fresh writable directory.
pub fn stage_writable(
    share_dir: &Path,
    subdir: Option<&Path>,
) -> Result<StagedFixtures, RecipeError> {
    let source = match subdir {
        Some(sub) => share_dir.join(sub),
        None => share_dir.to_path_buf(),
    };
    if !source.is_dir() {
        return Err(RecipeError::FixtureSourceMissing { path: source });
    }

    let dir = tempfile::Builder::new()
        .prefix("kettle-verify-")
        .tempdir()
        .map_err(|e| RecipeError::io("failed to create verification directory", e))?;
    let root = match subdir.and_then(|s| s.file_name()) {
        Some(name) => dir.path().join(name),
        None => dir.path().join("fixtures"),
    };

    let files = copy_dir_all(&source, &root)?;
    tracing::debug!("copied {} fixture file(s) to {}", files.len(), root.display());

    Ok(StagedFixtures { dir, root })
}

/// Runs verification cases against a staged fixture directory.
pub struct VerificationRunner<'a> {
    runner: &'a dyn ProcessRunner,
    env: BTreeMap<String, String>,
    case_timeout: Option<Duration>,
    parallel: bool,
    events: EventSink<'a>,
}

impl<'a> VerificationRunner<'a> {
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        VerificationRunner {
            runner,
            env: BTreeMap::new(),
            case_timeout: None,
            parallel: false,
            events: &ignore_events,
        }
    }

    /// Environment passed to every driver.
    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn case_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.case_timeout = timeout;
        self
    }

    /// Run cases concurrently. Results are the same either way.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn on_event(mut self, events: EventSink<'a>) -> Self {
        self.events = events;
        self
    }

    /// The driver command for a case.
    pub fn command_for(&self, case: &VerificationCase, staging_root: &Path) -> ProcessBuilder {
        let (program, args) = case
            .driver
            .split_first()
            .map(|(p, a)| (p.as_str(), a))
            .unwrap_or(("", &[]));
        ProcessBuilder::new(program)
            .args(args)
            .envs(self.env.iter())
            .cwd(staging_root)
            .timeout(self.case_timeout)
    }

    /// Run every case and report one outcome per label.
    pub fn verify(
        &self,
        cases: &[VerificationCase],
        staging_root: &Path,
    ) -> Result<VerifyReport, RecipeError> {
        check_writable(staging_root)?;
        (self.events)(&InstallEvent::VerifyStarted {
            cases: cases.len(),
            root: staging_root.to_path_buf(),
        });

        let start = Instant::now();
        let results: Vec<(String, CaseResult)> = if self.parallel {
            cases
                .par_iter()
                .map(|case| (case.label.clone(), self.run_case(case, staging_root)))
                .collect()
        } else {
            cases
                .iter()
                .map(|case| (case.label.clone(), self.run_case(case, staging_root)))
                .collect()
        };

        Ok(VerifyReport {
            cases: results.into_iter().collect(),
            total_duration: start.elapsed(),
        })
    }

    fn run_case(&self, case: &VerificationCase, staging_root: &Path) -> CaseResult {
        let cmd = self.command_for(case, staging_root);
        tracing::info!("case `{}`: {}", case.label, cmd.display_command());

        let start = Instant::now();
        let outcome = match self.runner.run(&cmd) {
            Ok(output) if output.timed_out => CaseOutcome::TimedOut {
                output: output.combined(),
            },
            Ok(output) if output.code == Some(case.expected_exit_code) => CaseOutcome::Pass,
            Ok(output) => CaseOutcome::Fail {
                exit_code: output.code,
                output: output.combined(),
            },
            Err(e) => CaseOutcome::Fail {
                exit_code: None,
                output: format!("{:#}", e),
            },
        };

        if !outcome.is_pass() {
            tracing::warn!("case `{}` {}", case.label, outcome.as_str());
        }

        let exit_code = match outcome {
            CaseOutcome::Pass => Some(case.expected_exit_code),
            CaseOutcome::Fail { exit_code, .. } => exit_code,
            CaseOutcome::TimedOut { .. } => None,
        };
        (self.events)(&InstallEvent::CaseFinished {
            label: case.label.clone(),
            outcome: outcome.as_str().to_string(),
            exit_code,
        });

        CaseResult {
            outcome,
            duration: start.elapsed(),
        }
    }
}

fn check_writable(dir: &Path) -> Result<(), RecipeError> {
    if dir.is_dir() && NamedTempFile::new_in(dir).is_ok() {
        return Ok(());
    }
    Err(RecipeError::StagingNotWritable {
        path: dir.to_path_buf(),
    })
}

/// Format a verification report for display (human-readable).
pub fn format_report(report: &VerifyReport, verbose: bool) -> String {
    let mut output = String::new();

    for (label, result) in &report.cases {
        let status = match result.outcome {
            CaseOutcome::Pass => "[OK]",
            CaseOutcome::Fail { .. } => "[FAIL]",
            CaseOutcome::TimedOut { .. } => "[TIMEOUT]",
        };
        let _ = writeln!(output, "  {} {} ({:.2?})", status, label, result.duration);

        if let CaseOutcome::Fail {
            exit_code: Some(code),
            ..
        } = result.outcome
        {
            let _ = writeln!(output, "      exit code {}", code);
        }
        if let Some(captured) = result.outcome.output() {
            let lines: Vec<&str> = captured.lines().collect();
            let shown = if verbose {
                &lines[..]
            } else {
                &lines[lines.len().saturating_sub(20)..]
            };
            for line in shown {
                let _ = writeln!(output, "      | {}", line);
            }
        }
    }

    let status = if report.passed() { "PASSED" } else { "FAILED" };
    let _ = writeln!(
        output,
        "Result: {} ({}/{} cases passed)",
        status,
        report.passed_count(),
        report.cases.len()
    );

    output
}
