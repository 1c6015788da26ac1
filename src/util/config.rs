//! Configuration file support for Kettle.
//!
//! Kettle reads two configuration file locations:
//! - Global: `~/.kettle/config.toml` - User-wide defaults
//! - Project: `.kettle/config.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config, and CLI flags take
//! precedence over both.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default timeout for a single build step (two hours).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 7200;

/// Default timeout for a single verification case (thirty minutes).
pub const DEFAULT_CASE_TIMEOUT_SECS: u64 = 1800;

/// Kettle configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Build settings
    pub build: BuildConfig,

    /// Verification settings
    pub verify: VerifyConfig,

    /// Compiler discovery settings
    pub toolchain: ToolchainConfig,

    /// Dependency prefixes, available to recipes as `{name}` placeholders
    pub prefixes: BTreeMap<String, PathBuf>,
}

/// Build-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Default number of parallel jobs (None = auto-detect)
    pub jobs: Option<usize>,

    /// Per-step timeout in seconds; 0 disables the timeout
    pub step_timeout_secs: Option<u64>,
}

/// Verification-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Per-case timeout in seconds; 0 disables the timeout
    pub case_timeout_secs: Option<u64>,

    /// Run verification cases concurrently
    pub parallel: Option<bool>,
}

/// Compiler discovery configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Directories searched for compilers before `PATH`
    pub search_paths: Vec<PathBuf>,

    /// Compiler driver used to probe the installed version (e.g. `gfortran`)
    pub fortran: Option<String>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.build.jobs.is_some() {
            self.build.jobs = other.build.jobs;
        }
        if other.build.step_timeout_secs.is_some() {
            self.build.step_timeout_secs = other.build.step_timeout_secs;
        }

        if other.verify.case_timeout_secs.is_some() {
            self.verify.case_timeout_secs = other.verify.case_timeout_secs;
        }
        if other.verify.parallel.is_some() {
            self.verify.parallel = other.verify.parallel;
        }

        // Project search paths are tried first, global ones after
        if !other.toolchain.search_paths.is_empty() {
            let mut paths = other.toolchain.search_paths;
            for path in std::mem::take(&mut self.toolchain.search_paths) {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
            self.toolchain.search_paths = paths;
        }
        if other.toolchain.fortran.is_some() {
            self.toolchain.fortran = other.toolchain.fortran;
        }

        self.prefixes.extend(other.prefixes);
    }

    /// Timeout for build steps, `None` if disabled.
    pub fn step_timeout(&self) -> Option<Duration> {
        timeout_from_secs(
            self.build
                .step_timeout_secs
                .unwrap_or(DEFAULT_STEP_TIMEOUT_SECS),
        )
    }

    /// Timeout for verification cases, `None` if disabled.
    pub fn case_timeout(&self) -> Option<Duration> {
        timeout_from_secs(
            self.verify
                .case_timeout_secs
                .unwrap_or(DEFAULT_CASE_TIMEOUT_SECS),
        )
    }

    pub fn parallel_verify(&self) -> bool {
        self.verify.parallel.unwrap_or(false)
    }

    /// Resolve relative search paths against the directory they were
    /// configured from.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in &mut self.toolchain.search_paths {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        for path in self.prefixes.values_mut() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.kettle/config.toml)
/// 2. Global config (~/.kettle/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    if global_path.exists() {
        let global = Config::load_or_default(global_path);
        config.merge(global);
    }

    // Project config overrides global
    if project_path.exists() {
        let mut project = Config::load_or_default(project_path);
        if let Some(root) = project_path.parent().and_then(Path::parent) {
            project.resolve_paths(root);
        }
        config.merge(project);
    }

    config
}

/// Get the global kettle config directory (~/.kettle).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".kettle"))
}

/// Get the global config path (~/.kettle/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the project config path (.kettle/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".kettle").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.build.jobs.is_none());
        assert_eq!(config.step_timeout(), Some(Duration::from_secs(7200)));
        assert_eq!(config.case_timeout(), Some(Duration::from_secs(1800)));
        assert!(!config.parallel_verify());
        assert!(config.prefixes.is_empty());
    }

    #[test]
    fn test_config_load() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");

        std::fs::write(
            &config_path,
            r#"
[build]
jobs = 8
step_timeout_secs = 0

[verify]
case_timeout_secs = 60
parallel = true

[toolchain]
search_paths = ["/opt/gcc/bin"]
fortran = "gfortran"

[prefixes]
openblas = "/opt/openblas"
"#,
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.build.jobs, Some(8));
        assert_eq!(config.step_timeout(), None);
        assert_eq!(config.case_timeout(), Some(Duration::from_secs(60)));
        assert!(config.parallel_verify());
        assert_eq!(config.toolchain.search_paths, vec![PathBuf::from("/opt/gcc/bin")]);
        assert_eq!(config.toolchain.fortran.as_deref(), Some("gfortran"));
        assert_eq!(
            config.prefixes.get("openblas"),
            Some(&PathBuf::from("/opt/openblas"))
        );
    }

    #[test]
    fn test_config_load_invalid() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(&config_path, "[build]\njobs = \"many\"\n").unwrap();

        let err = Config::load(&config_path).unwrap_err();
        assert!(err.to_string().contains("failed to parse config file"));

        // load_or_default falls back rather than failing
        assert!(Config::load_or_default(&config_path).build.jobs.is_none());
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.build.jobs = Some(4);
        base.verify.case_timeout_secs = Some(100);
        base.toolchain.search_paths = vec![PathBuf::from("/global")];
        base.prefixes
            .insert("openblas".into(), PathBuf::from("/global/openblas"));
        base.prefixes
            .insert("open-mpi".into(), PathBuf::from("/global/open-mpi"));

        let mut override_cfg = Config::default();
        override_cfg.build.jobs = Some(16);
        override_cfg.toolchain.search_paths = vec![PathBuf::from("/project")];
        override_cfg
            .prefixes
            .insert("openblas".into(), PathBuf::from("/project/openblas"));

        base.merge(override_cfg);

        assert_eq!(base.build.jobs, Some(16));
        assert_eq!(base.verify.case_timeout_secs, Some(100)); // Not overridden
        assert_eq!(
            base.toolchain.search_paths,
            vec![PathBuf::from("/project"), PathBuf::from("/global")]
        );
        assert_eq!(base.prefixes["openblas"], PathBuf::from("/project/openblas"));
        assert_eq!(base.prefixes["open-mpi"], PathBuf::from("/global/open-mpi"));
    }

    #[test]
    fn test_load_config_project_wins() {
        let tmp = TempDir::new().unwrap();
        let global = tmp.path().join("global.toml");
        std::fs::write(&global, "[build]\njobs = 2\n[verify]\nparallel = true\n").unwrap();

        let project_root = tmp.path().join("proj");
        let project = project_config_path(&project_root);
        std::fs::create_dir_all(project.parent().unwrap()).unwrap();
        std::fs::write(
            &project,
            "[build]\njobs = 6\n[toolchain]\nsearch_paths = [\"tools/bin\"]\n",
        )
        .unwrap();

        let config = load_config(&global, &project);
        assert_eq!(config.build.jobs, Some(6));
        assert!(config.parallel_verify());
        assert_eq!(
            config.toolchain.search_paths,
            vec![project_root.join("tools/bin")]
        );
    }

    #[test]
    fn test_load_config_missing_files() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(
            &tmp.path().join("nope.toml"),
            &tmp.path().join(".kettle/config.toml"),
        );
        assert!(config.build.jobs.is_none());
    }
}
