//! `kettle install` command

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;

use crate::cli::InstallArgs;
use crate::commands::{install_options, load_recipe, load_settings};
use kettle::builder::InstallEvent;
use kettle::ops::{format_verify_report, install, VerifyReport};
use kettle::util::diagnostic::{emit, Diagnostic};
use kettle::util::shell::{format_duration, Progress, Shell, Status};
use kettle::util::SystemRunner;

pub fn execute(args: InstallArgs, shell: &Arc<Shell>) -> Result<()> {
    let config = load_settings()?;
    let recipe = load_recipe(&args.recipe)?;

    let mut options = install_options(
        &config,
        &args.source,
        &args.prefix,
        args.jobs,
        &args.toolchain,
    )?;
    if let Some(secs) = args.step_timeout {
        options.step_timeout = (secs > 0).then(|| std::time::Duration::from_secs(secs));
    }
    options.parallel_verify |= args.parallel_verify;
    options.verify = !args.no_verify;

    shell.status(
        Status::Installing,
        format!(
            "{} v{} into {}",
            recipe.package.name,
            recipe.package.version,
            options.prefix.display()
        ),
    );

    let start = Instant::now();
    let reporter = EventReporter::new(shell);
    let sink = |event: &InstallEvent| reporter.report(event);
    let result = install(&recipe, &options, &SystemRunner, &sink);
    reporter.finish();

    let duration_ms = start.elapsed().as_millis() as u64;
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            shell.json_line(&InstallEvent::finished(false, duration_ms));
            return Err(e.into());
        }
    };
    shell.json_line(&InstallEvent::finished(report.success(), duration_ms));

    if shell.is_json() {
        shell.json_line(&report);
    } else {
        if let Some(ref verify) = report.verify {
            eprint!("{}", format_verify_report(verify, shell.is_verbose()));
        }
        shell.status(
            Status::Installed,
            format!(
                "{} v{} in {}",
                report.package,
                report.version,
                format_duration(start.elapsed())
            ),
        );
        if let Some(ref caveats) = report.caveats {
            if !shell.is_quiet() {
                eprintln!("\n==> Caveats\n{}", caveats.trim_end());
            }
        }
    }

    if let Some(diag) = report.verify.as_ref().and_then(VerifyReport::to_diagnostic) {
        report_verify_failure(shell, diag.with_context("the install was left in place"));
        std::process::exit(1);
    }

    Ok(())
}

/// Print the warning for failed verification cases.
pub fn report_verify_failure(shell: &Shell, diag: Diagnostic) {
    if shell.is_json() {
        shell.json_line(&InstallEvent::warning(diag.message.clone()));
    } else {
        emit(&diag, shell.use_color());
    }
}

/// Turns engine events into status lines, JSON lines and a progress bar.
pub struct EventReporter<'a> {
    shell: &'a Arc<Shell>,
    progress: Mutex<Option<Progress>>,
}

impl<'a> EventReporter<'a> {
    pub fn new(shell: &'a Arc<Shell>) -> Self {
        EventReporter {
            shell,
            progress: Mutex::new(None),
        }
    }

    pub fn report(&self, event: &InstallEvent) {
        let shell = self.shell;
        if shell.is_json() {
            shell.json_line(event);
        }

        match event {
            InstallEvent::ToolchainResolved {
                family,
                major_version,
                bin_dir,
            } => shell.status(
                Status::Resolving,
                format!("{} {} toolchain ({})", family, major_version, bin_dir.display()),
            ),
            InstallEvent::PatchApplied { file } => {
                shell.status(Status::Patched, file.display())
            }
            InstallEvent::StepStarted {
                index,
                name,
                command,
            } => shell.status(Status::Running, format!("[{}] {}: `{}`", index, name, command)),
            InstallEvent::StepFinished {
                name, duration_ms, ..
            } if shell.is_verbose() => shell.status(
                Status::Finished,
                format!(
                    "{} in {}",
                    name,
                    format_duration(std::time::Duration::from_millis(*duration_ms))
                ),
            ),
            InstallEvent::FixturesStaged { files, destination } => shell.status(
                Status::Staged,
                format!("{} fixture file(s) into {}", files, destination.display()),
            ),
            InstallEvent::VerifyStarted { cases, root } => {
                shell.status(
                    Status::Testing,
                    format!("{} case(s) in {}", cases, root.display()),
                );
                if let Ok(mut progress) = self.progress.lock() {
                    *progress = Some(shell.progress(*cases as u64, "verifying"));
                }
            }
            InstallEvent::CaseFinished {
                label,
                outcome,
                exit_code,
            } => {
                if let Ok(mut progress) = self.progress.lock() {
                    if let Some(progress) = progress.as_mut() {
                        progress.inc(1);
                    }
                }
                // The bar stands in for per-case lines unless verbose
                if !shell.is_verbose() {
                    return;
                }
                match (outcome.as_str(), exit_code) {
                    ("pass", _) => shell.status(Status::Passed, label),
                    (_, Some(code)) => {
                        shell.status(Status::Failed, format!("{} (exit code {})", label, code))
                    }
                    (other, None) => shell.status(Status::Failed, format!("{} ({})", label, other)),
                }
            }
            InstallEvent::Diagnostic { message, .. } => shell.warn(message),
            _ => {}
        }
    }

    pub fn finish(&self) {
        if let Ok(progress) = self.progress.lock() {
            if let Some(progress) = progress.as_ref() {
                progress.finish();
            }
        }
    }
}
