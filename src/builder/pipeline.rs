//! Sequential, fail-fast execution of build steps.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::builder::env::BuildEnvironment;
use crate::builder::events::{ignore_events, EventSink, InstallEvent};
use crate::core::error::RecipeError;
use crate::core::recipe::BuildStep;
use crate::util::process::{ProcessBuilder, ProcessRunner};

/// Runs a recipe's [`BuildStep`]s in order under one environment.
///
/// Steps are never retried and never run concurrently with each other; the
/// job count only reaches the compile step through `-j<jobs>`. A failed run
/// leaves the source tree as the failing step left it.
pub struct BuildPipeline<'a> {
    runner: &'a dyn ProcessRunner,
    source_root: PathBuf,
    jobs: usize,
    step_timeout: Option<Duration>,
    events: EventSink<'a>,
}

impl<'a> BuildPipeline<'a> {
    /// Create a pipeline rooted at the unpacked source tree.
    pub fn new(runner: &'a dyn ProcessRunner, source_root: impl Into<PathBuf>) -> Self {
        BuildPipeline {
            runner,
            source_root: source_root.into(),
            jobs: 1,
            step_timeout: None,
            events: &ignore_events,
        }
    }

    /// Job count forwarded to parallel steps.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Kill any step running longer than `timeout`.
    pub fn step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Report step progress to `events`.
    pub fn on_event(mut self, events: EventSink<'a>) -> Self {
        self.events = events;
        self
    }

    /// The command a step will run, without running it.
    pub fn command_for(&self, step: &BuildStep, env: &BuildEnvironment) -> ProcessBuilder {
        let cwd = match step.workdir {
            Some(ref dir) => self.source_root.join(dir),
            None => self.source_root.clone(),
        };

        let mut cmd = ProcessBuilder::new(resolve_program(&step.command, &cwd))
            .args(&step.args)
            .envs(env.iter())
            .cwd(&cwd)
            .timeout(self.step_timeout);
        if step.parallel {
            cmd = cmd.arg(format!("-j{}", self.jobs));
        }
        cmd
    }

    /// Run every step in order, stopping at the first failure.
    pub fn run(&self, steps: &[BuildStep], env: &BuildEnvironment) -> Result<(), RecipeError> {
        for (i, step) in steps.iter().enumerate() {
            self.run_step(i + 1, step, env)?;
        }
        Ok(())
    }

    fn run_step(
        &self,
        index: usize,
        step: &BuildStep,
        env: &BuildEnvironment,
    ) -> Result<(), RecipeError> {
        let cmd = self.command_for(step, env);
        let command = cmd.display_command();

        tracing::info!("step {} `{}`: {}", index, step.name, command);
        (self.events)(&InstallEvent::StepStarted {
            index,
            name: step.name.clone(),
            command: command.clone(),
        });

        let start = Instant::now();
        let output = match self.runner.run(&cmd) {
            Ok(output) => output,
            Err(e) => {
                return Err(RecipeError::BuildStepFailed {
                    step_index: index,
                    step: step.name.clone(),
                    command,
                    exit_code: None,
                    output: format!("{:#}", e),
                })
            }
        };

        if output.timed_out {
            return Err(RecipeError::BuildStepTimedOut {
                step_index: index,
                step: step.name.clone(),
                command,
                timeout_secs: self.step_timeout.map(|t| t.as_secs()).unwrap_or_default(),
                output: output.combined(),
            });
        }

        if !output.success() {
            return Err(RecipeError::BuildStepFailed {
                step_index: index,
                step: step.name.clone(),
                command,
                exit_code: output.code,
                output: output.combined(),
            });
        }

        (self.events)(&InstallEvent::StepFinished {
            index,
            name: step.name.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        });
        Ok(())
    }
}

/// `./configure` runs from the step's directory; bare names go through `PATH`.
fn resolve_program(command: &str, cwd: &Path) -> PathBuf {
    let path = Path::new(command);
    if path.is_relative() && command.contains('/') {
        cwd.join(path)
    } else {
        path.to_path_buf()
    }
}
