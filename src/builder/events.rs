//! Install event types for JSON output.
//!
//! These events are emitted one per line when using `--message-format=json`,
//! and drive the human status lines otherwise.
//!
//! # Event Types
//!
//! - `toolchain-resolved`: the compiler family and version were found
//! - `patch-applied`: a source patch was applied
//! - `step-started` / `step-finished`: a build step began or exited successfully
//! - `fixtures-staged`: fixture files were copied into the share directory
//! - `verify-started`: fixtures are staged and the cases are about to run
//! - `case-finished`: a verification case produced an outcome
//! - `install-finished`: the run completed (success or failure)
//!
//! # Stability
//!
//! New fields may be added, but existing fields should not be removed or renamed.

use std::path::PathBuf;

use serde::Serialize;

/// An event emitted while a recipe runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason")]
pub enum InstallEvent {
    #[serde(rename = "toolchain-resolved")]
    ToolchainResolved {
        family: String,
        major_version: u32,
        bin_dir: PathBuf,
    },

    #[serde(rename = "patch-applied")]
    PatchApplied { file: PathBuf },

    #[serde(rename = "step-started")]
    StepStarted {
        /// 1-based position in the pipeline
        index: usize,
        name: String,
        command: String,
    },

    #[serde(rename = "step-finished")]
    StepFinished {
        index: usize,
        name: String,
        duration_ms: u64,
    },

    #[serde(rename = "fixtures-staged")]
    FixturesStaged { files: usize, destination: PathBuf },

    #[serde(rename = "verify-started")]
    VerifyStarted { cases: usize, root: PathBuf },

    #[serde(rename = "case-finished")]
    CaseFinished {
        label: String,
        /// "pass", "fail" or "timed-out"
        outcome: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },

    #[serde(rename = "install-finished")]
    InstallFinished { success: bool, duration_ms: u64 },

    /// A generic diagnostic message.
    #[serde(rename = "diagnostic")]
    Diagnostic {
        /// Severity level ("error" or "warning")
        level: String,
        message: String,
    },
}

impl InstallEvent {
    /// Create an install finished event.
    pub fn finished(success: bool, duration_ms: u64) -> Self {
        InstallEvent::InstallFinished {
            success,
            duration_ms,
        }
    }

    /// Create an error diagnostic event.
    pub fn error(message: impl Into<String>) -> Self {
        InstallEvent::Diagnostic {
            level: "error".to_string(),
            message: message.into(),
        }
    }

    /// Create a warning diagnostic event.
    pub fn warning(message: impl Into<String>) -> Self {
        InstallEvent::Diagnostic {
            level: "warning".to_string(),
            message: message.into(),
        }
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Receiver for [`InstallEvent`]s.
pub type EventSink<'a> = &'a (dyn Fn(&InstallEvent) + Sync);

/// Sink that drops every event.
pub fn ignore_events(_: &InstallEvent) {}
