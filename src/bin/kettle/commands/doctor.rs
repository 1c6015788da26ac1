//! `kettle doctor` command

use std::sync::Arc;

use anyhow::Result;

use crate::cli::DoctorArgs;
use crate::commands::{install_options, load_recipe, load_settings};
use kettle::ops::{doctor, format_report, DoctorOptions};
use kettle::util::{Shell, SystemRunner};

pub fn execute(args: DoctorArgs, shell: &Arc<Shell>) -> Result<()> {
    let config = load_settings()?;
    let recipe = args.recipe.as_deref().map(load_recipe).transpose()?;
    let cwd = std::env::current_dir()?;
    let install = install_options(&config, &cwd, &cwd, None, &args.toolchain)?;

    let options = DoctorOptions {
        recipe,
        search_paths: install.search_paths,
        probe: install.probe,
        prefixes: install.prefixes,
    };

    let report = doctor(&options, &SystemRunner);

    if shell.is_json() {
        shell.json_line(&report);
    } else {
        print!("{}", format_report(&report, shell.is_verbose()));
    }

    // Exit with error code if required checks failed
    if !report.all_required_passed() {
        std::process::exit(1);
    }

    Ok(())
}
