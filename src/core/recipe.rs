//! Recipe file parsing and schema.
//!
//! A recipe is the declarative description of one package build: which
//! toolchain it needs, how the build environment is composed, which source
//! patches to apply, the ordered build steps, the fixtures to install and
//! the verification cases to run afterwards.
//!
//! String fields may contain `{name}` placeholders. They are expanded by
//! [`Recipe::instantiate`] once the install prefix and job count are known.
//! Shell-style `${NAME}` is left untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::builder::toolchain::ToolchainRequirement;
use crate::core::error::RecipeError;
use crate::util::fs::is_contained_relative;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_-]*)\}").expect("valid regex"));

/// Variables available to placeholders.
pub type Placeholders = BTreeMap<String, String>;

/// A parsed recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub package: PackageInfo,

    pub toolchain: ToolchainRequirement,

    #[serde(default)]
    pub environment: EnvironmentSpec,

    #[serde(default, rename = "patch")]
    pub patches: Vec<PatchSpec>,

    #[serde(default, rename = "step")]
    pub steps: Vec<BuildStep>,

    #[serde(default, rename = "fixture")]
    pub fixtures: Vec<FixtureMapping>,

    #[serde(default)]
    pub verify: VerifySpec,
}

/// The `[package]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,

    /// Printed after a successful install
    #[serde(default)]
    pub caveats: Option<String>,
}

/// Compiler wrapper flavour used to delegate to the resolved toolchain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapperKind {
    /// Open MPI wrappers, delegating through `OMPI_CC`/`OMPI_CXX`/`OMPI_FC`
    #[default]
    OpenMpi,
    /// MPICH wrappers, delegating through `MPICH_CC`/`MPICH_CXX`/`MPICH_FC`
    Mpich,
    /// No wrapper; the compiler-role variables name the raw compilers
    None,
}

impl WrapperKind {
    /// Wrapper binaries for `(CC, CXX, FC)`, if this is a real wrapper.
    pub fn wrapper_binaries(&self) -> Option<(&'static str, &'static str, &'static str)> {
        match self {
            WrapperKind::OpenMpi | WrapperKind::Mpich => Some(("mpicc", "mpicxx", "mpif90")),
            WrapperKind::None => None,
        }
    }

    /// Delegation variables for `(CC, CXX, FC)`.
    pub fn delegation_vars(&self) -> Option<(&'static str, &'static str, &'static str)> {
        match self {
            WrapperKind::OpenMpi => Some(("OMPI_CC", "OMPI_CXX", "OMPI_FC")),
            WrapperKind::Mpich => Some(("MPICH_CC", "MPICH_CXX", "MPICH_FC")),
            WrapperKind::None => None,
        }
    }
}

/// The `[environment]` section: static inputs to environment composition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    #[serde(default)]
    pub wrapper: WrapperKind,

    #[serde(default)]
    pub cflags: String,

    #[serde(default)]
    pub fflags: String,

    /// Defaults to `fflags`
    #[serde(default)]
    pub fcflags: Option<String>,

    #[serde(default)]
    pub lapack_libs: Option<String>,

    #[serde(default)]
    pub ppflags: String,

    /// Applied after everything else; last writer wins.
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

/// One textual substitution in the unpacked source tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSpec {
    /// File to patch, relative to the source root
    pub file: PathBuf,
    pub search: String,
    pub replace: String,

    /// 1-based match to replace when `search` occurs more than once
    #[serde(default)]
    pub occurrence: Option<usize>,
}

/// One external process in the build pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    pub name: String,
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory relative to the source root
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    /// Append `-j<jobs>` to the arguments
    #[serde(default)]
    pub parallel: bool,
}

/// Source-relative file or directory copied to a destination-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureMapping {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// The `[verify]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySpec {
    /// Environment passed to every driver
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Subdirectory of the share dir copied to the writable staging area
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default, rename = "case")]
    pub cases: Vec<VerificationCase>,
}

/// A single verification driver invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCase {
    pub label: String,

    /// Program followed by its arguments
    pub driver: Vec<String>,

    #[serde(default)]
    pub expected_exit_code: i32,
}

impl Recipe {
    /// Load a recipe from a TOML file.
    pub fn load(path: &Path) -> Result<Self, RecipeError> {
        let content = crate::util::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| match e {
            RecipeError::RecipeInvalid { message } => {
                RecipeError::invalid(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    /// Parse and validate recipe content.
    pub fn parse(content: &str) -> Result<Self, RecipeError> {
        let recipe: Recipe =
            toml::from_str(content).map_err(|e| RecipeError::invalid(e.to_string()))?;
        recipe.validate()?;
        Ok(recipe)
    }

    /// Check structural rules that serde cannot express.
    pub fn validate(&self) -> Result<(), RecipeError> {
        if self.package.name.trim().is_empty() {
            return Err(RecipeError::invalid("package name is empty"));
        }

        if self.steps.is_empty() {
            return Err(RecipeError::invalid("recipe has no build steps"));
        }

        for step in &self.steps {
            if step.command.trim().is_empty() {
                return Err(RecipeError::invalid(format!(
                    "step `{}` has an empty command",
                    step.name
                )));
            }
            if let Some(ref dir) = step.workdir {
                if !is_contained_relative(dir) {
                    return Err(RecipeError::invalid(format!(
                        "step `{}` workdir `{}` must be relative to the source tree",
                        step.name,
                        dir.display()
                    )));
                }
            }
        }

        for patch in &self.patches {
            if patch.search.is_empty() {
                return Err(RecipeError::invalid(format!(
                    "patch for `{}` has empty search text",
                    patch.file.display()
                )));
            }
            if patch.occurrence == Some(0) {
                return Err(RecipeError::invalid(format!(
                    "patch for `{}`: occurrence is 1-based",
                    patch.file.display()
                )));
            }
            if !is_contained_relative(&patch.file) {
                return Err(RecipeError::invalid(format!(
                    "patch target `{}` must be relative to the source tree",
                    patch.file.display()
                )));
            }
        }

        for fixture in &self.fixtures {
            if !is_contained_relative(&fixture.destination) {
                return Err(RecipeError::FixtureDestinationInvalid {
                    path: fixture.destination.clone(),
                });
            }
        }

        if let Some(ref root) = self.verify.root {
            if !is_contained_relative(root) {
                return Err(RecipeError::invalid(format!(
                    "verify root `{}` must be relative to the share directory",
                    root.display()
                )));
            }
        }

        let mut labels = BTreeSet::new();
        for case in &self.verify.cases {
            if case.driver.is_empty() {
                return Err(RecipeError::invalid(format!(
                    "verification case `{}` has an empty driver",
                    case.label
                )));
            }
            if !labels.insert(case.label.as_str()) {
                return Err(RecipeError::invalid(format!(
                    "duplicate verification case `{}`",
                    case.label
                )));
            }
        }

        for key in self.environment.overrides.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(RecipeError::invalid(format!(
                    "invalid environment variable name `{}`",
                    key
                )));
            }
        }

        Ok(())
    }

    /// Directory the package's data files are installed into.
    pub fn share_dir(&self, prefix: &Path) -> PathBuf {
        prefix.join("share").join(&self.package.name)
    }

    /// Standard placeholder values for an install into `prefix`.
    ///
    /// `prefixes` maps dependency names (e.g. `openblas`) to their install
    /// prefixes; each becomes a placeholder of the same name.
    pub fn placeholders(
        &self,
        prefix: &Path,
        jobs: usize,
        prefixes: &BTreeMap<String, PathBuf>,
    ) -> Placeholders {
        let mut vars = Placeholders::new();
        for (name, path) in prefixes {
            vars.insert(name.clone(), path.display().to_string());
        }
        vars.insert("prefix".into(), prefix.display().to_string());
        vars.insert("bin".into(), prefix.join("bin").display().to_string());
        vars.insert("share".into(), self.share_dir(prefix).display().to_string());
        vars.insert("jobs".into(), jobs.to_string());
        vars
    }

    /// Expand placeholders in every instantiable field.
    ///
    /// Patch text and fixture paths are literal and are never expanded.
    pub fn instantiate(&self, vars: &Placeholders) -> Result<Recipe, RecipeError> {
        let mut out = self.clone();

        if let Some(ref caveats) = self.package.caveats {
            out.package.caveats = Some(expand(caveats, vars)?);
        }

        let env = &mut out.environment;
        env.cflags = expand(&env.cflags, vars)?;
        env.fflags = expand(&env.fflags, vars)?;
        env.ppflags = expand(&env.ppflags, vars)?;
        env.fcflags = env.fcflags.as_deref().map(|s| expand(s, vars)).transpose()?;
        env.lapack_libs = env
            .lapack_libs
            .as_deref()
            .map(|s| expand(s, vars))
            .transpose()?;
        env.overrides = expand_map(&env.overrides, vars)?;

        for step in &mut out.steps {
            step.command = expand(&step.command, vars)?;
            step.args = step
                .args
                .iter()
                .map(|a| expand(a, vars))
                .collect::<Result<_, _>>()?;
        }

        out.verify.env = expand_map(&out.verify.env, vars)?;
        for case in &mut out.verify.cases {
            case.driver = case
                .driver
                .iter()
                .map(|a| expand(a, vars))
                .collect::<Result<_, _>>()?;
        }

        Ok(out)
    }
}

fn expand_map(
    map: &BTreeMap<String, String>,
    vars: &Placeholders,
) -> Result<BTreeMap<String, String>, RecipeError> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), expand(v, vars)?)))
        .collect()
}

/// Expand `{name}` placeholders in `input`.
pub fn expand(input: &str, vars: &Placeholders) -> Result<String, RecipeError> {
    let mut unknown = None;

    let expanded = PLACEHOLDER.replace_all(input, |caps: &Captures<'_>| {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let start = caps.get(0).map(|m| m.start()).unwrap_or_default();
        if input[..start].ends_with('$') {
            return whole.to_string();
        }
        let name = &caps[1];
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                unknown.get_or_insert_with(|| name.to_string());
                whole.to_string()
            }
        }
    });

    match unknown {
        Some(name) => Err(RecipeError::invalid(format!(
            "unknown placeholder `{{{}}}` in `{}`",
            name, input
        ))),
        None => Ok(expanded.into_owned()),
    }
}
