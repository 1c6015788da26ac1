//! Toolchain resolution for recipe builds.
//!
//! A recipe names the compiler family it needs; the resolver finds the
//! installed major version of that family and derives the concrete,
//! version-suffixed binary names (`gcc-15`, `gfortran-15`, `cpp-15`) that the
//! environment composer hands to the external build.
//!
//! Resolution priority for the version probe:
//! 1. `--fortran` on the command line (or `KETTLE_FORTRAN`)
//! 2. `[toolchain] fortran` in the config file
//! 3. The family's unversioned Fortran driver (`gfortran`)

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod detect;
mod names;

pub use detect::{detect_family, parse_major_version, ToolchainResolver};
pub use names::FamilyTools;

/// A compiler family a recipe can require or reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompilerFamily {
    /// GNU Compiler Collection (gcc, g++, gfortran)
    Gnu,
    /// Clang/LLVM
    Clang,
    /// Apple Clang (macOS system compiler)
    AppleClang,
}

impl CompilerFamily {
    /// Get the family name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompilerFamily::Gnu => "gnu",
            CompilerFamily::Clang => "clang",
            CompilerFamily::AppleClang => "apple-clang",
        }
    }
}

impl fmt::Display for CompilerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompilerFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gnu" | "gcc" => Ok(CompilerFamily::Gnu),
            "clang" | "llvm" => Ok(CompilerFamily::Clang),
            "apple-clang" | "appleclang" => Ok(CompilerFamily::AppleClang),
            _ => Err(format!(
                "unknown compiler family '{}'; expected 'gnu', 'clang', or 'apple-clang'",
                s
            )),
        }
    }
}

/// The role a derived binary plays in the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolRole {
    /// C compiler
    Cc,
    /// C++ compiler
    Cxx,
    /// Fortran compiler
    Fc,
    /// C preprocessor, used for Fortran sources
    Cpp,
}

impl ToolRole {
    /// Every role, in a stable order.
    pub const ALL: [ToolRole; 4] = [ToolRole::Cc, ToolRole::Cxx, ToolRole::Fc, ToolRole::Cpp];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolRole::Cc => "cc",
            ToolRole::Cxx => "cxx",
            ToolRole::Fc => "fc",
            ToolRole::Cpp => "cpp",
        }
    }
}

/// What a recipe demands of the toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainRequirement {
    /// Required compiler family
    pub family: CompilerFamily,

    /// Whether a Fortran compiler is mandatory
    #[serde(default = "default_true")]
    pub fortran: bool,

    /// Families rejected outright, even if they are the system default
    #[serde(default)]
    pub reject: Vec<CompilerFamily>,

    /// Why the rejected families cannot be used
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ToolchainRequirement {
    /// Requirement for a family with Fortran support and no rejections.
    pub fn new(family: CompilerFamily) -> Self {
        ToolchainRequirement {
            family,
            fortran: true,
            reject: Vec::new(),
            reason: None,
        }
    }
}

/// A resolved toolchain. Created once per install run and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainInfo {
    /// Resolved compiler family
    pub family: CompilerFamily,

    /// Installed major version (e.g. 15)
    pub major_version: u32,

    /// Binary name per role (e.g. `fc -> gfortran-15`)
    pub binaries: BTreeMap<ToolRole, String>,

    /// Directory holding the derived binaries
    pub bin_dir: PathBuf,
}

impl ToolchainInfo {
    /// Derive a toolchain from a family, major version and bin directory.
    pub fn new(family: CompilerFamily, major_version: u32, bin_dir: impl Into<PathBuf>) -> Self {
        let binaries = FamilyTools::for_family(family).versioned(major_version);
        ToolchainInfo {
            family,
            major_version,
            binaries,
            bin_dir: bin_dir.into(),
        }
    }

    /// Bare binary name for a role, if the toolchain has one.
    pub fn binary(&self, role: ToolRole) -> Option<&str> {
        self.binaries.get(&role).map(String::as_str)
    }

    /// Full path of the binary for a role.
    pub fn binary_path(&self, role: ToolRole) -> Option<PathBuf> {
        self.binary(role).map(|name| self.bin_dir.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_parse() {
        assert_eq!("gnu".parse::<CompilerFamily>().unwrap(), CompilerFamily::Gnu);
        assert_eq!("GCC".parse::<CompilerFamily>().unwrap(), CompilerFamily::Gnu);
        assert_eq!("clang".parse::<CompilerFamily>().unwrap(), CompilerFamily::Clang);
        assert!("msvc".parse::<CompilerFamily>().is_err());
    }

    #[test]
    fn test_info_derives_versioned_binaries() {
        let info = ToolchainInfo::new(CompilerFamily::Gnu, 15, "/opt/gcc/bin");

        assert_eq!(info.binary(ToolRole::Cc), Some("gcc-15"));
        assert_eq!(info.binary(ToolRole::Cxx), Some("g++-15"));
        assert_eq!(info.binary(ToolRole::Fc), Some("gfortran-15"));
        assert_eq!(
            info.binary_path(ToolRole::Cpp),
            Some(PathBuf::from("/opt/gcc/bin/cpp-15"))
        );
    }

    #[test]
    fn test_clang_has_no_fortran() {
        let info = ToolchainInfo::new(CompilerFamily::Clang, 18, "/usr/bin");
        assert_eq!(info.binary(ToolRole::Cc), Some("clang-18"));
        assert_eq!(info.binary(ToolRole::Fc), None);
    }
}
