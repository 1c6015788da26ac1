//! `kettle env` command
//!
//! Prints the environment a build would run with, without running it.

use std::sync::Arc;

use anyhow::Result;

use crate::cli::EnvArgs;
use crate::commands::{install_options, load_recipe, load_settings};
use kettle::ops::plan;
use kettle::util::shell::{Shell, Status};
use kettle::util::SystemRunner;

pub fn execute(args: EnvArgs, shell: &Arc<Shell>) -> Result<()> {
    let config = load_settings()?;
    let recipe = load_recipe(&args.recipe)?;
    let cwd = std::env::current_dir()?;
    let options = install_options(&config, &cwd, &args.prefix, None, &args.toolchain)?;

    shell.status(
        Status::Composing,
        format!("environment for {} v{}", recipe.package.name, recipe.package.version),
    );
    let plan = plan(&recipe, &options, &SystemRunner)?;

    if shell.is_json() {
        shell.json_line(&plan.environment);
        return Ok(());
    }

    for (key, value) in plan.environment.iter() {
        if args.export {
            println!("export {}={}", key, shell_quote(value));
        } else {
            println!("{}={}", key, value);
        }
    }

    Ok(())
}

/// Single-quote a value for a POSIX shell when it needs it.
fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=+:,@".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
