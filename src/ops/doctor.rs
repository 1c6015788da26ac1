//! Environment and toolchain health checks.
//!
//! The `doctor` command checks, without building anything, that the tools an
//! install needs are present.
//!
//! ## Usage
//!
//! ```bash
//! kettle doctor                       # Generic checks
//! kettle doctor recipes/genesis.toml  # Checks for one recipe
//! ```
//!
//! ## Checks Performed
//!
//! - Build tools (autoreconf, make)
//! - The required compiler family and its version-suffixed binaries
//! - Compiler wrappers (mpicc, mpicxx, mpif90)
//! - Verification driver interpreters (e.g. python3)
//! - Dependency prefixes referenced by the recipe

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::builder::toolchain::{
    CompilerFamily, ToolRole, ToolchainInfo, ToolchainRequirement, ToolchainResolver,
};
use crate::core::recipe::Recipe;
use crate::util::process::{ProcessBuilder, ProcessRunner};

/// Result of a single health check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Name of the check
    pub name: String,

    /// Whether the check passed
    pub passed: bool,

    /// Human-readable status message
    pub message: String,

    /// Path to the tool (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Version string (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip)]
    pub duration: Duration,

    /// Whether this check is required or optional
    pub required: bool,
}

impl CheckResult {
    /// Create a passing check result.
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        CheckResult {
            name: name.into(),
            passed: true,
            message: message.into(),
            path: None,
            version: None,
            duration: Duration::ZERO,
            required: true,
        }
    }

    /// Create a failing check result.
    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        CheckResult {
            passed: false,
            ..CheckResult::pass(name, message)
        }
    }

    /// Mark this check as optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Summary of all health checks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DoctorReport {
    /// Individual check results
    pub checks: Vec<CheckResult>,

    #[serde(skip)]
    pub total_duration: Duration,

    /// Environment information
    pub environment: BTreeMap<String, String>,
}

impl DoctorReport {
    pub fn new() -> Self {
        DoctorReport::default()
    }

    pub fn add(&mut self, check: CheckResult) {
        self.checks.push(check);
    }

    /// Check if all required checks passed.
    pub fn all_required_passed(&self) -> bool {
        self.checks.iter().filter(|c| c.required).all(|c| c.passed)
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }

    pub fn required_failed_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.required && !c.passed)
            .count()
    }
}

/// Options for the doctor command.
#[derive(Debug, Clone, Default)]
pub struct DoctorOptions {
    /// Recipe whose requirements are checked; generic checks when absent
    pub recipe: Option<Recipe>,

    /// Extra directories searched for compilers before `PATH`
    pub search_paths: Vec<PathBuf>,

    /// Driver used to probe the compiler version
    pub probe: Option<String>,

    /// Dependency prefixes from configuration
    pub prefixes: BTreeMap<String, PathBuf>,
}

/// Run the doctor checks.
pub fn doctor(options: &DoctorOptions, runner: &dyn ProcessRunner) -> DoctorReport {
    let start = Instant::now();
    let mut report = DoctorReport::new();

    report
        .environment
        .insert("os".to_string(), std::env::consts::OS.to_string());
    report
        .environment
        .insert("arch".to_string(), std::env::consts::ARCH.to_string());

    for tool in ["autoreconf", "make"] {
        report.add(check_tool(runner, options, tool, "Build tool"));
    }

    let requirement = options
        .recipe
        .as_ref()
        .map(|r| r.toolchain.clone())
        .unwrap_or_else(|| ToolchainRequirement::new(CompilerFamily::Gnu));
    let toolchain = check_toolchain(runner, options, &requirement, &mut report);
    if let Some(ref info) = toolchain {
        report
            .environment
            .insert("toolchain".to_string(), format!("{} {}", info.family, info.major_version));
        for check in check_versioned_binaries(runner, options, info) {
            report.add(check);
        }
    }

    if let Some(ref recipe) = options.recipe {
        if let Some((cc, cxx, fc)) = recipe.environment.wrapper.wrapper_binaries() {
            for wrapper in [cc, cxx, fc] {
                report.add(check_tool(runner, options, wrapper, "Compiler wrapper"));
            }
        }

        let mut drivers: Vec<&str> = recipe
            .verify
            .cases
            .iter()
            .filter_map(|c| c.driver.first().map(String::as_str))
            .collect();
        drivers.sort_unstable();
        drivers.dedup();
        for driver in drivers {
            report.add(check_tool(runner, options, driver, "Verification driver").optional());
        }

        report.add(check_placeholders(recipe, &options.prefixes));
    }

    report.total_duration = start.elapsed();
    report
}

fn check_tool(
    runner: &dyn ProcessRunner,
    options: &DoctorOptions,
    tool: &str,
    kind: &str,
) -> CheckResult {
    let start = Instant::now();
    let name = format!("{}: {}", kind, tool);

    match runner.find_executable(tool, &options.search_paths) {
        Some(path) => {
            let mut check = CheckResult::pass(name, format!("Found {}", tool));
            if let Some(version) = first_version_line(runner, &path) {
                check = check.with_version(version);
            }
            check.with_path(path).with_duration(start.elapsed())
        }
        None => CheckResult::fail(name, format!("{} not found on PATH", tool))
            .with_duration(start.elapsed()),
    }
}

fn check_toolchain(
    runner: &dyn ProcessRunner,
    options: &DoctorOptions,
    requirement: &ToolchainRequirement,
    report: &mut DoctorReport,
) -> Option<ToolchainInfo> {
    let start = Instant::now();
    let name = format!("Toolchain: {}", requirement.family);

    let result = ToolchainResolver::new(runner)
        .search_paths(options.search_paths.clone())
        .probe(options.probe.clone())
        .resolve(requirement);

    match result {
        Ok(info) => {
            report.add(
                CheckResult::pass(name, format!("{} {} found", info.family, info.major_version))
                    .with_path(info.bin_dir.clone())
                    .with_version(info.major_version.to_string())
                    .with_duration(start.elapsed()),
            );
            Some(info)
        }
        Err(e) => {
            report.add(CheckResult::fail(name, e.to_string()).with_duration(start.elapsed()));
            None
        }
    }
}

fn check_versioned_binaries(
    runner: &dyn ProcessRunner,
    options: &DoctorOptions,
    info: &ToolchainInfo,
) -> Vec<CheckResult> {
    let mut search = vec![info.bin_dir.clone()];
    search.extend(options.search_paths.iter().cloned());

    ToolRole::ALL
        .iter()
        .filter_map(|role| info.binary(*role).map(|name| (*role, name)))
        .map(|(role, binary)| {
            let name = format!("Compiler ({}): {}", role.as_str(), binary);
            match runner.find_executable(binary, &search) {
                Some(path) => CheckResult::pass(name, format!("Found {}", binary)).with_path(path),
                None => CheckResult::fail(
                    name,
                    format!("{} not found in {}", binary, info.bin_dir.display()),
                ),
            }
        })
        .collect()
}

fn check_placeholders(recipe: &Recipe, prefixes: &BTreeMap<String, PathBuf>) -> CheckResult {
    let vars = recipe.placeholders(Path::new("/prefix"), 1, prefixes);
    match recipe.instantiate(&vars) {
        Ok(_) => CheckResult::pass("Dependency prefixes", "All placeholders resolve"),
        Err(e) => CheckResult::fail(
            "Dependency prefixes",
            format!("{} (add it under [prefixes] in the kettle config)", e),
        ),
    }
}

/// First non-empty line of `<tool> --version`, if it runs.
fn first_version_line(runner: &dyn ProcessRunner, path: &Path) -> Option<String> {
    let cmd = ProcessBuilder::new(path)
        .arg("--version")
        .timeout(Some(Duration::from_secs(10)));
    let output = runner.run(&cmd).ok()?;
    output
        .combined()
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Format the doctor report for display.
pub fn format_report(report: &DoctorReport, verbose: bool) -> String {
    use std::fmt::Write;

    let mut output = String::new();

    let _ = writeln!(output, "Kettle Doctor");
    let _ = writeln!(output, "=============\n");

    if verbose {
        let _ = writeln!(output, "Environment:");
        for (key, value) in &report.environment {
            let _ = writeln!(output, "  {}: {}", key, value);
        }
        let _ = writeln!(output);
    }

    let _ = writeln!(output, "Checks:");
    for check in &report.checks {
        let status = if check.passed { "[OK]" } else { "[!!]" };
        let required = if check.required { "" } else { " (optional)" };

        let _ = writeln!(output, "  {} {}{}", status, check.name, required);

        if verbose || !check.passed {
            let _ = writeln!(output, "      {}", check.message);
        }
        if verbose {
            if let Some(path) = &check.path {
                let _ = writeln!(output, "      Path: {}", path.display());
            }
            if let Some(version) = &check.version {
                let _ = writeln!(output, "      Version: {}", version);
            }
        }
    }

    let _ = writeln!(output);

    let passed = report.passed_count();
    let failed = report.failed_count();
    let required_failed = report.required_failed_count();

    let _ = writeln!(output, "Summary: {} passed, {} failed", passed, failed);

    if required_failed > 0 {
        let _ = writeln!(
            output,
            "\nWarning: {} required check(s) failed. Installs will not succeed.",
            required_failed
        );
    } else if failed > 0 {
        let _ = writeln!(
            output,
            "\nAll required checks passed. {} optional check(s) failed.",
            failed
        );
    } else {
        let _ = writeln!(output, "\nAll checks passed.");
    }

    output
}
