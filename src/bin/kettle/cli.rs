//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell as CompletionShell;

use kettle::util::shell::ColorChoice;

/// Kettle - build, install and verify packages from declarative recipes
#[derive(Parser)]
#[command(name = "kettle")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Coloring: auto, always, never
    #[arg(long, global = true, default_value = "auto", value_name = "WHEN")]
    pub color: ColorChoice,

    /// Output format for messages
    #[arg(long, global = true, value_enum, default_value_t = MessageFormat::Human)]
    pub message_format: MessageFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Patch, build and install a source tree, then verify the install
    Install(InstallArgs),

    /// Run the verification cases against an existing install
    Test(TestArgs),

    /// Print the composed build environment
    Env(EnvArgs),

    /// Show everything an install would do, without running it
    Plan(PlanArgs),

    /// Show the resolved compiler toolchain
    Toolchain(ToolchainArgs),

    /// Check that the tools a recipe needs are installed
    Doctor(DoctorArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Options shared by every command that resolves a toolchain.
#[derive(Args, Debug, Clone, Default)]
pub struct ToolchainOpts {
    /// Fortran driver used to probe the compiler version
    #[arg(long, env = "KETTLE_FORTRAN", value_name = "DRIVER")]
    pub fortran: Option<String>,

    /// Directory searched for compilers before PATH (repeatable)
    #[arg(long = "search-path", value_name = "DIR")]
    pub search_paths: Vec<PathBuf>,

    /// Dependency prefix for recipe placeholders, e.g. `openblas=/opt/openblas`
    #[arg(long = "dep", value_name = "NAME=PATH", value_parser = parse_dep)]
    pub deps: Vec<(String, PathBuf)>,
}

#[derive(Args)]
pub struct InstallArgs {
    /// Path to the recipe file
    pub recipe: PathBuf,

    /// Unpacked source tree
    #[arg(long, default_value = ".")]
    pub source: PathBuf,

    /// Install prefix
    #[arg(long)]
    pub prefix: PathBuf,

    /// Number of parallel jobs for parallel steps
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Skip verification after installing
    #[arg(long)]
    pub no_verify: bool,

    /// Per-step timeout in seconds (0 disables)
    #[arg(long, value_name = "SECS")]
    pub step_timeout: Option<u64>,

    /// Run verification cases concurrently
    #[arg(long)]
    pub parallel_verify: bool,

    #[command(flatten)]
    pub toolchain: ToolchainOpts,
}

#[derive(Args)]
pub struct TestArgs {
    /// Path to the recipe file
    pub recipe: PathBuf,

    /// Install prefix to verify
    #[arg(long)]
    pub prefix: PathBuf,

    /// Only run the named case (repeatable)
    #[arg(long = "case", value_name = "LABEL")]
    pub cases: Vec<String>,

    /// Keep the scratch directory the cases ran in
    #[arg(long)]
    pub keep: bool,

    /// Per-case timeout in seconds (0 disables)
    #[arg(long, value_name = "SECS")]
    pub case_timeout: Option<u64>,

    /// Run cases concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Dependency prefix for recipe placeholders, e.g. `openblas=/opt/openblas`
    #[arg(long = "dep", value_name = "NAME=PATH", value_parser = parse_dep)]
    pub deps: Vec<(String, PathBuf)>,
}

#[derive(Args)]
pub struct EnvArgs {
    /// Path to the recipe file
    pub recipe: PathBuf,

    /// Install prefix used for placeholders
    #[arg(long, default_value = "/usr/local")]
    pub prefix: PathBuf,

    /// Print `export` lines for a POSIX shell
    #[arg(long)]
    pub export: bool,

    #[command(flatten)]
    pub toolchain: ToolchainOpts,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Path to the recipe file
    pub recipe: PathBuf,

    /// Unpacked source tree
    #[arg(long, default_value = ".")]
    pub source: PathBuf,

    /// Install prefix
    #[arg(long, default_value = "/usr/local")]
    pub prefix: PathBuf,

    /// Number of parallel jobs for parallel steps
    #[arg(short, long)]
    pub jobs: Option<usize>,

    #[command(flatten)]
    pub toolchain: ToolchainOpts,
}

#[derive(Args)]
pub struct ToolchainArgs {
    /// Recipe whose toolchain requirement to resolve (defaults to GNU with Fortran)
    pub recipe: Option<PathBuf>,

    #[command(flatten)]
    pub toolchain: ToolchainOpts,
}

#[derive(Args)]
pub struct DoctorArgs {
    /// Recipe to check requirements for
    pub recipe: Option<PathBuf>,

    #[command(flatten)]
    pub toolchain: ToolchainOpts,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: CompletionShell,
}

fn parse_dep(s: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got `{}`", s))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, got `{}`", s));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_dep() {
        assert_eq!(
            parse_dep("openblas=/opt/openblas").unwrap(),
            ("openblas".to_string(), PathBuf::from("/opt/openblas"))
        );
        assert!(parse_dep("openblas").is_err());
        assert!(parse_dep("=/opt").is_err());
    }

    #[test]
    fn test_install_args() {
        let cli = Cli::try_parse_from([
            "kettle",
            "install",
            "genesis.toml",
            "--prefix",
            "/opt/genesis",
            "-j",
            "8",
            "--dep",
            "openblas=/opt/openblas",
        ])
        .unwrap();

        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.jobs, Some(8));
        assert_eq!(args.source, PathBuf::from("."));
        assert_eq!(args.toolchain.deps.len(), 1);
        assert!(!args.no_verify);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["kettle", "-q", "-v", "doctor"]).is_err());
    }
}
