//! Binary naming per compiler family.

use std::collections::BTreeMap;

use super::{CompilerFamily, ToolRole};

/// Unversioned driver names of a compiler family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyTools {
    pub cc: &'static str,
    pub cxx: &'static str,
    /// `None` when the family ships no Fortran front end
    pub fc: Option<&'static str>,
    pub cpp: &'static str,
}

impl FamilyTools {
    /// Driver names for a family.
    pub fn for_family(family: CompilerFamily) -> Self {
        match family {
            CompilerFamily::Gnu => FamilyTools {
                cc: "gcc",
                cxx: "g++",
                fc: Some("gfortran"),
                cpp: "cpp",
            },
            CompilerFamily::Clang | CompilerFamily::AppleClang => FamilyTools {
                cc: "clang",
                cxx: "clang++",
                fc: None,
                cpp: "clang-cpp",
            },
        }
    }

    /// Version-suffixed names, e.g. `gcc` at 15 -> `gcc-15`.
    pub fn versioned(&self, major: u32) -> BTreeMap<ToolRole, String> {
        let mut names = BTreeMap::new();
        names.insert(ToolRole::Cc, format!("{}-{}", self.cc, major));
        names.insert(ToolRole::Cxx, format!("{}-{}", self.cxx, major));
        if let Some(fc) = self.fc {
            names.insert(ToolRole::Fc, format!("{}-{}", fc, major));
        }
        names.insert(ToolRole::Cpp, format!("{}-{}", self.cpp, major));
        names
    }

    /// The driver used to probe the installed version.
    ///
    /// Fortran when the family has it, so the probe also proves the front end exists.
    pub fn probe(&self) -> &'static str {
        self.fc.unwrap_or(self.cc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_suffix_changes_with_version() {
        let tools = FamilyTools::for_family(CompilerFamily::Gnu);
        let v15 = tools.versioned(15);
        let v14 = tools.versioned(14);

        for (role, name) in &v15 {
            assert_eq!(name.replace("-15", "-14"), v14[role]);
        }
    }

    #[test]
    fn test_probe_prefers_fortran() {
        assert_eq!(FamilyTools::for_family(CompilerFamily::Gnu).probe(), "gfortran");
        assert_eq!(FamilyTools::for_family(CompilerFamily::Clang).probe(), "clang");
    }
}
