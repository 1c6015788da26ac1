//! Command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::cli::ToolchainOpts;
use kettle::core::recipe::Recipe;
use kettle::ops::InstallOptions;
use kettle::util::config::{global_config_path, load_config, project_config_path, Config};

pub mod completions;
pub mod doctor;
pub mod env;
pub mod install;
pub mod plan;
pub mod toolchain;

/// Load `~/.kettle/config.toml` merged with `.kettle/config.toml` in the
/// current directory.
pub fn load_settings() -> Result<Config> {
    let cwd = std::env::current_dir().context("failed to determine the current directory")?;
    let global = global_config_path().unwrap_or_default();
    Ok(load_config(&global, &project_config_path(&cwd)))
}

pub fn load_recipe(path: &Path) -> Result<Recipe> {
    Ok(Recipe::load(path)?)
}

/// Install options from config, with CLI toolchain flags layered on top.
///
/// Relative source and prefix paths are made absolute, since build steps run
/// inside the source tree.
pub fn install_options(
    config: &Config,
    source: &Path,
    prefix: &Path,
    jobs: Option<usize>,
    opts: &ToolchainOpts,
) -> Result<InstallOptions> {
    let mut options = InstallOptions::new(absolute(source)?, absolute(prefix)?);
    if let Some(jobs) = jobs.or(config.build.jobs) {
        options.jobs = jobs.max(1);
    }
    options.step_timeout = config.step_timeout();
    options.case_timeout = config.case_timeout();
    options.parallel_verify = config.parallel_verify();
    options.prefixes = config.prefixes.clone();
    apply_toolchain_opts(&mut options, config, opts);
    Ok(options)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to determine the current directory")?;
    Ok(cwd.join(path))
}

fn apply_toolchain_opts(options: &mut InstallOptions, config: &Config, opts: &ToolchainOpts) {
    let mut search_paths = opts.search_paths.clone();
    search_paths.extend(config.toolchain.search_paths.iter().cloned());
    options.search_paths = search_paths;
    options.probe = opts.fortran.clone().or_else(|| config.toolchain.fortran.clone());
    options.prefixes.extend(opts.deps.iter().cloned());
}
