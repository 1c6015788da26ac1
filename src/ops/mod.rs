//! High-level operations.
//!
//! This module contains the implementation of kettle commands.

pub mod doctor;
pub mod install;
pub mod verify;

pub use doctor::{doctor, format_report, DoctorOptions, DoctorReport};
pub use install::{
    default_jobs, install, no_events, plan, test_install, InstallOptions, InstallPlan,
    InstallReport,
};
pub use verify::{
    format_report as format_verify_report, stage_writable, CaseOutcome, StagedFixtures,
    VerificationRunner, VerifyReport,
};
