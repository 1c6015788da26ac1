//! Toolchain detection functions.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::error::RecipeError;
use crate::util::process::{ProcessBuilder, ProcessRunner};

use super::{CompilerFamily, FamilyTools, ToolRole, ToolchainInfo, ToolchainRequirement};

static MAJOR_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)(?:\.\d+)*\s*$").expect("valid regex"));

/// Resolves a [`ToolchainRequirement`] against the local system.
///
/// Only read-only queries are made: `PATH` lookups and `--version` /
/// `-dumpversion` probes.
pub struct ToolchainResolver<'a> {
    runner: &'a dyn ProcessRunner,
    search_paths: Vec<PathBuf>,
    probe: Option<String>,
}

impl<'a> ToolchainResolver<'a> {
    /// Create a resolver that probes through `runner`.
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        ToolchainResolver {
            runner,
            search_paths: Vec::new(),
            probe: None,
        }
    }

    /// Directories searched before `PATH`.
    pub fn search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    /// Use a specific driver for the version probe instead of the family default.
    pub fn probe(mut self, probe: Option<String>) -> Self {
        self.probe = probe;
        self
    }

    fn find(&self, name: &str) -> Option<PathBuf> {
        self.runner.find_executable(name, &self.search_paths)
    }

    /// Find the installed toolchain satisfying `req`.
    pub fn resolve(&self, req: &ToolchainRequirement) -> Result<ToolchainInfo, RecipeError> {
        let tools = FamilyTools::for_family(req.family);

        if req.fortran && tools.fc.is_none() {
            return Err(RecipeError::CompilerIncompatible {
                found: req.family.to_string(),
                reason: format!("a Fortran compiler is required and {} has none", req.family),
            });
        }

        let probe_name = self
            .probe
            .clone()
            .unwrap_or_else(|| tools.probe().to_string());

        let Some(probe_path) = self.find(&probe_name) else {
            return Err(self.explain_missing(req, &tools, &probe_name));
        };

        let family = detect_family(self.runner, &probe_path);
        tracing::debug!("{} identifies as {}", probe_path.display(), family);

        if req.reject.contains(&family) || family != req.family {
            return Err(RecipeError::CompilerIncompatible {
                found: format!("{} ({})", probe_path.display(), family),
                reason: req
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("this recipe requires the {} family", req.family)),
            });
        }

        let major = self.major_version(&probe_path)?;
        let info = ToolchainInfo::new(family, major, PathBuf::new());

        // The versioned drivers normally live next to each other; locate them
        // through the probe role so FPP gets a real directory.
        let role = if tools.fc.is_some() { ToolRole::Fc } else { ToolRole::Cc };
        let bin_dir = info
            .binary(role)
            .and_then(|name| self.find(name))
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .or_else(|| {
                tracing::warn!(
                    "no version-suffixed {} found, assuming it lives beside {}",
                    info.binary(role).unwrap_or_default(),
                    probe_path.display()
                );
                probe_path.parent().map(Path::to_path_buf)
            })
            .unwrap_or_default();

        tracing::info!(
            "Resolved {} {} toolchain in {}",
            family,
            major,
            bin_dir.display()
        );

        Ok(ToolchainInfo { bin_dir, ..info })
    }

    fn major_version(&self, probe: &Path) -> Result<u32, RecipeError> {
        let cmd = ProcessBuilder::new(probe).arg("-dumpversion");
        let output = self.runner.run(&cmd).map_err(|e| RecipeError::CompilerIncompatible {
            found: probe.display().to_string(),
            reason: format!("version probe failed: {:#}", e),
        })?;

        parse_major_version(&output.stdout).ok_or_else(|| RecipeError::CompilerIncompatible {
            found: probe.display().to_string(),
            reason: format!(
                "could not read a version from `{}`: {}",
                cmd.display_command(),
                output.combined().trim()
            ),
        })
    }

    /// Build the error for a missing probe driver.
    ///
    /// A C compiler with no Fortran driver beside it is a different failure
    /// from having no compiler at all.
    fn explain_missing(
        &self,
        req: &ToolchainRequirement,
        tools: &FamilyTools,
        probe_name: &str,
    ) -> RecipeError {
        if req.fortran {
            if let Some(cc) = self.find(tools.cc) {
                let family = detect_family(self.runner, &cc);
                return RecipeError::CompilerIncompatible {
                    found: format!("{} ({})", cc.display(), family),
                    reason: req.reason.clone().unwrap_or_else(|| {
                        format!("a Fortran compiler ({}) is required", probe_name)
                    }),
                };
            }
        }

        RecipeError::ToolchainNotFound {
            family: req.family.to_string(),
            searched: vec![probe_name.to_string(), tools.cc.to_string()],
        }
    }
}

/// Parse the major version out of `-dumpversion` output (`15` or `15.1.0`).
pub fn parse_major_version(output: &str) -> Option<u32> {
    let first = output.lines().next()?;
    MAJOR_VERSION
        .captures(first)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Detect whether a compiler driver is GCC, Clang, or Apple Clang.
///
/// The `--version` banner wins over the binary name, since `gcc` on macOS is
/// Apple Clang in disguise.
pub fn detect_family(runner: &dyn ProcessRunner, compiler: &Path) -> CompilerFamily {
    if let Ok(output) = runner.run(&ProcessBuilder::new(compiler).arg("--version")) {
        let banner = output.stdout.to_lowercase();
        if banner.contains("clang") {
            if banner.contains("apple") {
                return CompilerFamily::AppleClang;
            }
            return CompilerFamily::Clang;
        }
        if banner.contains("gnu") || banner.contains("gcc") || banner.contains("free software foundation") {
            return CompilerFamily::Gnu;
        }
    }

    let name = compiler
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();

    if name.contains("clang") {
        CompilerFamily::Clang
    } else {
        CompilerFamily::Gnu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRunner;
    use crate::util::process::ProcessOutput;

    const GFORTRAN_BANNER: &str = "GNU Fortran (Homebrew GCC 15.1.0) 15.1.0\nCopyright (C) 2025 Free Software Foundation, Inc.";
    const APPLE_BANNER: &str = "Apple clang version 16.0.0 (clang-1600.0.26.6)\nTarget: arm64-apple-darwin24.1.0";

    fn gnu_runner(major: &str) -> FakeRunner {
        FakeRunner::new()
            .with_executable("gfortran", "/opt/homebrew/bin/gfortran")
            .with_executable(format!("gfortran-{}", major), "/opt/homebrew/opt/gcc/bin/gfortran-15")
            .on("/opt/homebrew/bin/gfortran --version", ProcessOutput::ok(GFORTRAN_BANNER))
            .on("/opt/homebrew/bin/gfortran -dumpversion", ProcessOutput::ok(format!("{}.1.0\n", major)))
    }

    #[test]
    fn test_parse_major_version() {
        assert_eq!(parse_major_version("15\n"), Some(15));
        assert_eq!(parse_major_version("14.2.0"), Some(14));
        assert_eq!(parse_major_version("  13.1  "), Some(13));
        assert_eq!(parse_major_version("gcc version 15"), None);
        assert_eq!(parse_major_version(""), None);
    }

    #[test]
    fn test_resolve_gnu_toolchain() {
        let runner = gnu_runner("15");
        let info = ToolchainResolver::new(&runner)
            .resolve(&ToolchainRequirement::new(CompilerFamily::Gnu))
            .unwrap();

        assert_eq!(info.family, CompilerFamily::Gnu);
        assert_eq!(info.major_version, 15);
        assert_eq!(info.binary(ToolRole::Cc), Some("gcc-15"));
        assert_eq!(info.bin_dir, PathBuf::from("/opt/homebrew/opt/gcc/bin"));
        assert_eq!(
            info.binary_path(ToolRole::Cpp),
            Some(PathBuf::from("/opt/homebrew/opt/gcc/bin/cpp-15"))
        );
    }

    #[test]
    fn test_missing_family_is_not_found() {
        let runner = FakeRunner::new();
        let err = ToolchainResolver::new(&runner)
            .resolve(&ToolchainRequirement::new(CompilerFamily::Gnu))
            .unwrap_err();

        assert!(matches!(err, RecipeError::ToolchainNotFound { ref family, .. } if family == "gnu"));
    }

    #[test]
    fn test_c_only_toolchain_is_incompatible() {
        let runner = FakeRunner::new()
            .with_executable("gcc", "/usr/bin/gcc")
            .on("/usr/bin/gcc --version", ProcessOutput::ok(APPLE_BANNER));
        let mut req = ToolchainRequirement::new(CompilerFamily::Gnu);
        req.reason = Some("GENESIS requires a Fortran compiler (gfortran)".into());

        let err = ToolchainResolver::new(&runner).resolve(&req).unwrap_err();

        match err {
            RecipeError::CompilerIncompatible { found, reason } => {
                assert!(found.contains("apple-clang"));
                assert!(reason.contains("gfortran"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rejected_family_is_incompatible() {
        let runner = FakeRunner::new()
            .with_executable("gfortran", "/usr/local/bin/gfortran")
            .on("/usr/local/bin/gfortran --version", ProcessOutput::ok("clang version 18.1.8"));
        let mut req = ToolchainRequirement::new(CompilerFamily::Gnu);
        req.reject = vec![CompilerFamily::Clang];

        let err = ToolchainResolver::new(&runner).resolve(&req).unwrap_err();
        assert!(matches!(err, RecipeError::CompilerIncompatible { .. }));
        // no version probe after rejection
        assert!(!runner.called("-dumpversion"));
    }

    #[test]
    fn test_family_without_fortran_is_rejected_outright() {
        let runner = FakeRunner::new();
        let err = ToolchainResolver::new(&runner)
            .resolve(&ToolchainRequirement::new(CompilerFamily::Clang))
            .unwrap_err();
        assert!(matches!(err, RecipeError::CompilerIncompatible { .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_unparseable_version_is_incompatible() {
        let runner = FakeRunner::new()
            .with_executable("gfortran", "/usr/bin/gfortran")
            .on("/usr/bin/gfortran --version", ProcessOutput::ok(GFORTRAN_BANNER))
            .on("/usr/bin/gfortran -dumpversion", ProcessOutput::ok("unknown"));

        let err = ToolchainResolver::new(&runner)
            .resolve(&ToolchainRequirement::new(CompilerFamily::Gnu))
            .unwrap_err();
        assert!(err.to_string().contains("could not read a version"));
    }

    #[test]
    fn test_detect_family_falls_back_to_name() {
        let runner = FakeRunner::new();
        assert_eq!(detect_family(&runner, Path::new("/usr/bin/clang")), CompilerFamily::Clang);
        assert_eq!(detect_family(&runner, Path::new("/usr/bin/gfortran")), CompilerFamily::Gnu);
    }
}
