//! Error taxonomy for recipe execution.
//!
//! Everything before verification is fail-fast: the first error aborts the
//! install and is returned to the caller. Errors raised by external processes
//! always carry the process's captured output verbatim.

use std::path::PathBuf;

use thiserror::Error;

use crate::util::diagnostic::{suggestions, Diagnostic};

/// Error raised while resolving, composing, patching, building or staging.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum RecipeError {
    #[error("no `{family}` toolchain found")]
    #[diagnostic(
        code(kettle::toolchain::not_found),
        help("install the compiler family or list its bin directory in `[toolchain] search_paths`")
    )]
    ToolchainNotFound { family: String, searched: Vec<String> },

    #[error("`{found}` cannot build this recipe: {reason}")]
    #[diagnostic(code(kettle::toolchain::incompatible))]
    CompilerIncompatible { found: String, reason: String },

    #[error("build environment is missing required variable `{variable}`")]
    #[diagnostic(code(kettle::env::incomplete))]
    EnvironmentIncomplete { variable: String },

    #[error("FPP is the generic preprocessor `{value}`, which cannot parse the package sources")]
    #[diagnostic(
        code(kettle::env::generic_preprocessor),
        help("point FPP at the toolchain's versioned cpp instead of a bare `cpp`")
    )]
    GenericPreprocessor { value: String },

    #[error("patch target `{}` does not exist", .path.display())]
    #[diagnostic(code(kettle::patch::target_missing))]
    PatchTargetMissing { path: PathBuf },

    #[error("patch text not found in `{}`", .path.display())]
    #[diagnostic(code(kettle::patch::not_found))]
    PatchMatchNotFound {
        path: PathBuf,
        search: String,
        /// The replacement text already appears somewhere in the file
        replacement_present: bool,
    },

    #[error("patch text occurs {count} times in `{}`", .path.display())]
    #[diagnostic(
        code(kettle::patch::ambiguous),
        help("set `occurrence` on the patch to pick which match to replace")
    )]
    PatchMatchAmbiguous {
        path: PathBuf,
        search: String,
        count: usize,
    },

    #[error("patch has already been applied to `{}`", .path.display())]
    #[diagnostic(
        code(kettle::patch::already_applied),
        help("start from a freshly unpacked source tree")
    )]
    PatchAlreadyApplied { path: PathBuf, search: String },

    #[error("step {step_index} `{step}` failed: `{command}` exited with {}\n{output}", describe_code(.exit_code))]
    #[diagnostic(code(kettle::build::step_failed))]
    BuildStepFailed {
        step_index: usize,
        step: String,
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("step {step_index} `{step}` timed out after {timeout_secs}s: `{command}`\n{output}")]
    #[diagnostic(
        code(kettle::build::step_timed_out),
        help("raise `[build] step_timeout_secs` if the step is legitimately slow")
    )]
    BuildStepTimedOut {
        step_index: usize,
        step: String,
        command: String,
        timeout_secs: u64,
        output: String,
    },

    #[error("install did not produce `{}`", .path.display())]
    #[diagnostic(code(kettle::build::layout))]
    InstallLayoutInvalid { path: PathBuf },

    #[error("fixture source `{}` does not exist", .path.display())]
    #[diagnostic(code(kettle::stage::source_missing))]
    FixtureSourceMissing { path: PathBuf },

    #[error("fixture destination `{}` must be relative and stay inside the staging root", .path.display())]
    #[diagnostic(code(kettle::stage::destination_invalid))]
    FixtureDestinationInvalid { path: PathBuf },

    #[error("verification directory `{}` is not writable", .path.display())]
    #[diagnostic(
        code(kettle::verify::not_writable),
        help("drivers write output next to their inputs; stage fixtures into a scratch directory first")
    )]
    StagingNotWritable { path: PathBuf },

    #[error("invalid recipe: {message}")]
    #[diagnostic(code(kettle::recipe::invalid))]
    RecipeInvalid { message: String },

    #[error("{context}")]
    #[diagnostic(code(kettle::io))]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (killed by a signal)".to_string(),
    }
}

impl RecipeError {
    /// Wrap an I/O error with a description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RecipeError::Io {
            context: context.into(),
            source,
        }
    }

    /// Shorthand for [`RecipeError::RecipeInvalid`].
    pub fn invalid(message: impl Into<String>) -> Self {
        RecipeError::RecipeInvalid {
            message: message.into(),
        }
    }

    /// Output captured from the external process behind this error, if any.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            RecipeError::BuildStepFailed { output, .. }
            | RecipeError::BuildStepTimedOut { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            RecipeError::ToolchainNotFound { family, searched } => {
                let mut diag = Diagnostic::error(format!("no `{}` toolchain found", family));
                if !searched.is_empty() {
                    diag = diag.with_context(format!("looked for: {}", searched.join(", ")));
                }
                diag.with_suggestion(suggestions::INSTALL_TOOLCHAIN)
            }

            RecipeError::CompilerIncompatible { found, reason } => {
                Diagnostic::error(format!("`{}` cannot build this recipe", found))
                    .with_context(reason.clone())
                    .with_suggestion(suggestions::INSTALL_TOOLCHAIN)
            }

            RecipeError::PatchMatchNotFound {
                path,
                search,
                replacement_present,
            } => {
                let mut diag = Diagnostic::error(self.to_string())
                    .with_location(path)
                    .with_context(format!("search text: {:?}", search));
                if *replacement_present {
                    diag = diag.with_context("the replacement text is already present in the file");
                }
                diag.with_suggestion(suggestions::FRESH_SOURCE)
            }

            RecipeError::PatchAlreadyApplied { path, search } => {
                Diagnostic::error(self.to_string())
                    .with_location(path)
                    .with_context(format!("search text: {:?}", search))
                    .with_suggestion(suggestions::FRESH_SOURCE)
            }

            RecipeError::PatchMatchAmbiguous { path, search, .. } => {
                Diagnostic::error(self.to_string())
                    .with_location(path)
                    .with_context(format!("search text: {:?}", search))
                    .with_suggestion("Set `occurrence = N` on the patch")
            }

            RecipeError::BuildStepFailed {
                step_index,
                step,
                command,
                exit_code,
                output,
            } => {
                let mut diag = Diagnostic::error(format!(
                    "step {} `{}` failed with {}",
                    step_index,
                    step,
                    describe_code(exit_code)
                ))
                .with_context(format!("command: {}", command));
                for line in output.lines() {
                    diag = diag.with_output(line);
                }
                diag.with_suggestion(suggestions::BUILD_FAILED)
            }

            RecipeError::BuildStepTimedOut {
                step_index,
                step,
                command,
                timeout_secs,
                output,
            } => {
                let mut diag = Diagnostic::error(format!(
                    "step {} `{}` timed out after {}s",
                    step_index, step, timeout_secs
                ))
                .with_context(format!("command: {}", command));
                for line in output.lines() {
                    diag = diag.with_output(line);
                }
                diag.with_suggestion(suggestions::STEP_TIMEOUT)
            }

            RecipeError::FixtureSourceMissing { path } => Diagnostic::error(self.to_string())
                .with_location(path)
                .with_suggestion(suggestions::FRESH_SOURCE),

            other => Diagnostic::error(other.to_string()),
        }
    }
}
