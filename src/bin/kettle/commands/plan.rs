//! `kettle plan` command
//!
//! Shows everything an install would do. Only the read-only compiler probes run.

use std::fmt::Write;
use std::sync::Arc;

use anyhow::Result;

use crate::cli::PlanArgs;
use crate::commands::{install_options, load_recipe, load_settings};
use kettle::ops::{plan, InstallPlan};
use kettle::util::Shell;
use kettle::util::SystemRunner;

pub fn execute(args: PlanArgs, shell: &Arc<Shell>) -> Result<()> {
    let config = load_settings()?;
    let recipe = load_recipe(&args.recipe)?;
    let options = install_options(
        &config,
        &args.source,
        &args.prefix,
        args.jobs,
        &args.toolchain,
    )?;

    let plan = plan(&recipe, &options, &SystemRunner)?;

    if shell.is_json() {
        shell.json_line(&plan);
    } else {
        print!("{}", format_plan(&plan));
    }
    Ok(())
}

fn format_plan(plan: &InstallPlan) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{} v{}", plan.package, plan.version);
    let _ = writeln!(out, "  prefix:    {}", plan.prefix.display());
    let _ = writeln!(
        out,
        "  toolchain: {} {} ({})",
        plan.toolchain.family,
        plan.toolchain.major_version,
        plan.toolchain.bin_dir.display()
    );

    if !plan.patches.is_empty() {
        let _ = writeln!(out, "\nPatches:");
        for patch in &plan.patches {
            let _ = writeln!(out, "  {}", patch.file.display());
            let _ = writeln!(out, "    - {}", patch.search);
            let _ = writeln!(out, "    + {}", patch.replace);
        }
    }

    let _ = writeln!(out, "\nSteps:");
    for (i, step) in plan.steps.iter().enumerate() {
        let _ = writeln!(out, "  {}. {:<10} {}", i + 1, step.name, step.command);
    }

    if !plan.fixtures.is_empty() {
        let _ = writeln!(out, "\nFixtures (into {}):", plan.share_dir.display());
        for fixture in &plan.fixtures {
            let _ = writeln!(
                out,
                "  {} -> {}",
                fixture.source.display(),
                fixture.destination.display()
            );
        }
    }

    if !plan.cases.is_empty() {
        let _ = writeln!(out, "\nVerification:");
        for (label, command) in &plan.cases {
            let _ = writeln!(out, "  {}: {}", label, command);
        }
    }

    out
}
