//! End-to-end recipe installation.
//!
//! Stages run in order and stop at the first error: toolchain resolution,
//! environment composition, source patching, the build pipeline, the install
//! layout check and fixture staging. Verification runs last and only ever
//! reports; it never turns a finished install into an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::builder::env::{compose, BuildEnvironment};
use crate::builder::events::{ignore_events, EventSink, InstallEvent};
use crate::builder::patch::apply_patch;
use crate::builder::pipeline::BuildPipeline;
use crate::builder::stage::stage;
use crate::builder::toolchain::{ToolchainInfo, ToolchainResolver};
use crate::core::error::RecipeError;
use crate::core::recipe::{FixtureMapping, PatchSpec, Recipe, VerificationCase};
use crate::ops::verify::{stage_writable, StagedFixtures, VerificationRunner, VerifyReport};
use crate::util::process::ProcessRunner;

/// Options for an install run.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Unpacked source tree
    pub source_dir: PathBuf,

    /// Install prefix
    pub prefix: PathBuf,

    /// Job count for parallel steps
    pub jobs: usize,

    pub step_timeout: Option<Duration>,
    pub case_timeout: Option<Duration>,

    /// Run verification cases concurrently
    pub parallel_verify: bool,

    /// Run verification after installing
    pub verify: bool,

    /// Dependency prefixes available as placeholders
    pub prefixes: BTreeMap<String, PathBuf>,

    /// Extra directories searched for compilers before `PATH`
    pub search_paths: Vec<PathBuf>,

    /// Driver used to probe the compiler version
    pub probe: Option<String>,
}

impl InstallOptions {
    /// Options with the job count set to the number of available CPUs.
    pub fn new(source_dir: impl Into<PathBuf>, prefix: impl Into<PathBuf>) -> Self {
        InstallOptions {
            source_dir: source_dir.into(),
            prefix: prefix.into(),
            jobs: default_jobs(),
            step_timeout: None,
            case_timeout: None,
            parallel_verify: false,
            verify: true,
            prefixes: BTreeMap::new(),
            search_paths: Vec::new(),
            probe: None,
        }
    }
}

/// Number of available CPUs, or 1 if it cannot be determined.
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Everything an install would do, computed without running anything
/// except the read-only toolchain probes.
#[derive(Debug, Clone, Serialize)]
pub struct InstallPlan {
    pub package: String,
    pub version: String,
    pub prefix: PathBuf,
    pub toolchain: ToolchainInfo,
    pub environment: BuildEnvironment,
    pub patches: Vec<PatchSpec>,
    /// Rendered command lines, in order
    pub steps: Vec<PlannedStep>,
    pub fixtures: Vec<FixtureMapping>,
    pub share_dir: PathBuf,
    /// Rendered driver command lines keyed by case label
    pub cases: BTreeMap<String, String>,
}

/// A build step as it will be run.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub name: String,
    pub command: String,
    pub cwd: PathBuf,
}

/// Result of a successful install.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub package: String,
    pub version: String,
    pub prefix: PathBuf,
    pub toolchain: ToolchainInfo,
    pub fixtures_staged: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caveats: Option<String>,
}

impl InstallReport {
    /// Installed, and verification (if it ran) passed.
    pub fn success(&self) -> bool {
        self.verify.as_ref().map_or(true, VerifyReport::passed)
    }
}

struct Prepared {
    recipe: Recipe,
    toolchain: ToolchainInfo,
    env: BuildEnvironment,
}

/// Instantiate the recipe, resolve the toolchain and compose the environment.
///
/// Nothing is mutated and no build process is spawned.
fn prepare(
    recipe: &Recipe,
    options: &InstallOptions,
    runner: &dyn ProcessRunner,
) -> Result<Prepared, RecipeError> {
    let vars = recipe.placeholders(&options.prefix, options.jobs, &options.prefixes);
    let recipe = recipe.instantiate(&vars)?;

    let toolchain = ToolchainResolver::new(runner)
        .search_paths(options.search_paths.clone())
        .probe(options.probe.clone())
        .resolve(&recipe.toolchain)?;
    let env = compose(&toolchain, &recipe.environment)?;

    Ok(Prepared {
        recipe,
        toolchain,
        env,
    })
}

/// Compute the install plan without building.
pub fn plan(
    recipe: &Recipe,
    options: &InstallOptions,
    runner: &dyn ProcessRunner,
) -> Result<InstallPlan, RecipeError> {
    let Prepared {
        recipe,
        toolchain,
        env,
    } = prepare(recipe, options, runner)?;

    let pipeline = BuildPipeline::new(runner, &options.source_dir)
        .jobs(options.jobs)
        .step_timeout(options.step_timeout);
    let steps = recipe
        .steps
        .iter()
        .map(|step| {
            let cmd = pipeline.command_for(step, &env);
            PlannedStep {
                name: step.name.clone(),
                command: cmd.display_command(),
                cwd: cmd.get_cwd().map(Path::to_path_buf).unwrap_or_default(),
            }
        })
        .collect();

    let share_dir = recipe.share_dir(&options.prefix);
    let staging = match recipe.verify.root {
        Some(ref root) => share_dir.join(root),
        None => share_dir.clone(),
    };
    let verifier = VerificationRunner::new(runner).env(recipe.verify.env.clone());
    let cases = recipe
        .verify
        .cases
        .iter()
        .map(|case| {
            (
                case.label.clone(),
                verifier.command_for(case, &staging).display_command(),
            )
        })
        .collect();

    Ok(InstallPlan {
        package: recipe.package.name.clone(),
        version: recipe.package.version.clone(),
        prefix: options.prefix.clone(),
        toolchain,
        environment: env,
        patches: recipe.patches.clone(),
        steps,
        fixtures: recipe.fixtures.clone(),
        share_dir,
        cases,
    })
}

/// Resolve, compose, patch, build, stage and optionally verify.
pub fn install(
    recipe: &Recipe,
    options: &InstallOptions,
    runner: &dyn ProcessRunner,
    events: EventSink<'_>,
) -> Result<InstallReport, RecipeError> {
    if !options.source_dir.is_dir() {
        return Err(RecipeError::io(
            format!("source tree `{}` not found", options.source_dir.display()),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
    }

    let Prepared {
        recipe,
        toolchain,
        env,
    } = prepare(recipe, options, runner)?;
    events(&InstallEvent::ToolchainResolved {
        family: toolchain.family.to_string(),
        major_version: toolchain.major_version,
        bin_dir: toolchain.bin_dir.clone(),
    });

    for patch in &recipe.patches {
        apply_patch(&options.source_dir, patch)?;
        events(&InstallEvent::PatchApplied {
            file: patch.file.clone(),
        });
    }

    BuildPipeline::new(runner, &options.source_dir)
        .jobs(options.jobs)
        .step_timeout(options.step_timeout)
        .on_event(events)
        .run(&recipe.steps, &env)?;

    let bin = options.prefix.join("bin");
    if !bin.is_dir() {
        return Err(RecipeError::InstallLayoutInvalid { path: bin });
    }

    let share_dir = recipe.share_dir(&options.prefix);
    let staged = stage(&recipe.fixtures, &options.source_dir, &share_dir)?;
    events(&InstallEvent::FixturesStaged {
        files: staged.len(),
        destination: share_dir.clone(),
    });

    let verify = if options.verify && !recipe.verify.cases.is_empty() {
        Some(verify_install(&recipe, options, runner, events)?)
    } else {
        None
    };

    tracing::info!(
        "installed {} {} into {}",
        recipe.package.name,
        recipe.package.version,
        options.prefix.display()
    );

    Ok(InstallReport {
        package: recipe.package.name.clone(),
        version: recipe.package.version.clone(),
        prefix: options.prefix.clone(),
        toolchain,
        fixtures_staged: staged.len(),
        verify,
        caveats: recipe.package.caveats.clone(),
    })
}

/// Verify an existing install under `options.prefix`.
///
/// The recipe is instantiated here; the toolchain is not consulted. An empty
/// `selected` runs every case. The staged fixtures are handed back so the
/// caller can keep them; dropping them removes the scratch directory.
pub fn test_install(
    recipe: &Recipe,
    options: &InstallOptions,
    selected: &[String],
    runner: &dyn ProcessRunner,
    events: EventSink<'_>,
) -> Result<(VerifyReport, StagedFixtures), RecipeError> {
    let vars = recipe.placeholders(&options.prefix, options.jobs, &options.prefixes);
    let recipe = recipe.instantiate(&vars)?;
    let cases = select_cases(&recipe.verify.cases, selected)?;

    let staged = stage_writable(
        &recipe.share_dir(&options.prefix),
        recipe.verify.root.as_deref(),
    )?;
    let report = verifier(&recipe, options, runner, events).verify(&cases, staged.root())?;
    Ok((report, staged))
}

fn verify_install(
    recipe: &Recipe,
    options: &InstallOptions,
    runner: &dyn ProcessRunner,
    events: EventSink<'_>,
) -> Result<VerifyReport, RecipeError> {
    let share_dir = recipe.share_dir(&options.prefix);
    let staged = stage_writable(&share_dir, recipe.verify.root.as_deref())?;

    verifier(recipe, options, runner, events).verify(&recipe.verify.cases, staged.root())
}

fn verifier<'a>(
    recipe: &Recipe,
    options: &InstallOptions,
    runner: &'a dyn ProcessRunner,
    events: EventSink<'a>,
) -> VerificationRunner<'a> {
    VerificationRunner::new(runner)
        .env(recipe.verify.env.clone())
        .case_timeout(options.case_timeout)
        .parallel(options.parallel_verify)
        .on_event(events)
}

fn select_cases(
    cases: &[VerificationCase],
    selected: &[String],
) -> Result<Vec<VerificationCase>, RecipeError> {
    if selected.is_empty() {
        return Ok(cases.to_vec());
    }
    selected
        .iter()
        .map(|label| {
            cases
                .iter()
                .find(|case| &case.label == label)
                .cloned()
                .ok_or_else(|| {
                    RecipeError::invalid(format!("no verification case labelled `{}`", label))
                })
        })
        .collect()
}

/// Sink for callers that do not observe progress.
pub fn no_events() -> EventSink<'static> {
    &ignore_events
}
