//! `kettle toolchain` command

use std::sync::Arc;

use anyhow::Result;

use crate::cli::ToolchainArgs;
use crate::commands::{install_options, load_recipe, load_settings};
use kettle::builder::toolchain::ToolRole;
use kettle::builder::{CompilerFamily, ToolchainRequirement, ToolchainResolver};
use kettle::util::shell::{Shell, Status};
use kettle::util::{ProcessRunner, SystemRunner};

pub fn execute(args: ToolchainArgs, shell: &Arc<Shell>) -> Result<()> {
    let config = load_settings()?;
    let requirement = match args.recipe {
        Some(ref path) => load_recipe(path)?.toolchain,
        None => ToolchainRequirement::new(CompilerFamily::Gnu),
    };
    let cwd = std::env::current_dir()?;
    let options = install_options(&config, &cwd, &cwd, None, &args.toolchain)?;

    shell.status(Status::Resolving, format!("{} toolchain", requirement.family));
    let runner = SystemRunner;
    let info = ToolchainResolver::new(&runner)
        .search_paths(options.search_paths.clone())
        .probe(options.probe.clone())
        .resolve(&requirement)?;

    if shell.is_json() {
        shell.json_line(&info);
        return Ok(());
    }

    println!("Toolchain:");
    println!();
    println!("  Family:  {}", info.family);
    println!("  Version: {}", info.major_version);
    println!("  Bin dir: {}", info.bin_dir.display());
    println!();
    println!("Binaries:");
    for role in ToolRole::ALL {
        let Some(name) = info.binary(role) else {
            continue;
        };
        let found = runner
            .find_executable(name, &options.search_paths)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not found".to_string());
        println!("  {:<4} {:<14} {}", role.as_str(), name, found);
    }

    Ok(())
}
