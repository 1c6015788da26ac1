//! Build environment composition.
//!
//! [`compose`] turns a resolved toolchain and a recipe's `[environment]`
//! section into the variable map handed to every build step. It is a pure
//! function: nothing here reads or writes the parent process environment.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::builder::toolchain::{ToolRole, ToolchainInfo};
use crate::core::error::RecipeError;
use crate::core::recipe::EnvironmentSpec;

/// Variables the external configure step depends on.
pub const REQUIRED_VARS: [&str; 10] = [
    "CC",
    "CXX",
    "FC",
    "F77",
    "CFLAGS",
    "FFLAGS",
    "FCFLAGS",
    "LAPACK_LIBS",
    "FPP",
    "PPFLAGS",
];

/// The preprocessor name configure treats specially.
///
/// configure only fills in its own PPFLAGS when FPP is exactly this string,
/// and the generic `cpp` cannot handle the package's Fortran sources anyway.
pub const GENERIC_FPP: &str = "cpp";

const HOST_TUNED_FLAGS: [&str; 3] = ["-march=native", "-mtune=native", "-mcpu=native"];

/// Environment variables for the build, keyed by name.
///
/// Read-only outside the crate; later inserts overwrite earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BuildEnvironment {
    vars: BTreeMap<String, String>,
}

impl BuildEnvironment {
    /// Get a variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Whether a variable is set.
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Iterate variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        tracing::debug!("env {}={}", key, value);
        self.vars.insert(key, value);
    }
}

/// Compose the build environment.
///
/// Order matters only for overrides: the static `overrides` table is applied
/// last, so it wins over anything derived from the toolchain.
pub fn compose(
    toolchain: &ToolchainInfo,
    spec: &EnvironmentSpec,
) -> Result<BuildEnvironment, RecipeError> {
    let mut env = BuildEnvironment::default();

    let cc = toolchain.binary(ToolRole::Cc);
    let cxx = toolchain.binary(ToolRole::Cxx);
    let fc = toolchain.binary(ToolRole::Fc);

    // Wrapper delegation: the MPI wrappers otherwise fall back to whatever
    // compiler they were configured with.
    if let Some((cc_var, cxx_var, fc_var)) = spec.wrapper.delegation_vars() {
        for (var, binary) in [(cc_var, cc), (cxx_var, cxx), (fc_var, fc)] {
            match binary {
                Some(binary) => env.insert(var, binary),
                None => {
                    return Err(RecipeError::EnvironmentIncomplete {
                        variable: var.to_string(),
                    })
                }
            }
        }
    }

    match spec.wrapper.wrapper_binaries() {
        Some((mpicc, mpicxx, mpifc)) => {
            env.insert("CC", mpicc);
            env.insert("CXX", mpicxx);
            env.insert("FC", mpifc);
            env.insert("F77", mpifc);
        }
        None => {
            for (var, binary) in [("CC", cc), ("CXX", cxx), ("FC", fc), ("F77", fc)] {
                if let Some(binary) = binary {
                    env.insert(var, binary);
                }
            }
        }
    }

    let fcflags = spec.fcflags.as_deref().unwrap_or(&spec.fflags);
    for (var, flags) in [
        ("CFLAGS", spec.cflags.as_str()),
        ("FFLAGS", spec.fflags.as_str()),
        ("FCFLAGS", fcflags),
    ] {
        reject_host_tuning(var, flags)?;
        if !flags.is_empty() {
            env.insert(var, flags);
        }
    }

    if let Some(ref libs) = spec.lapack_libs {
        env.insert("LAPACK_LIBS", libs.as_str());
    }

    if let Some(cpp) = toolchain.binary_path(ToolRole::Cpp) {
        env.insert("FPP", cpp.display().to_string());
    }
    if !spec.ppflags.is_empty() {
        env.insert("PPFLAGS", spec.ppflags.as_str());
    }

    for (key, value) in &spec.overrides {
        env.insert(key.as_str(), value.as_str());
    }

    check_complete(&env)?;
    Ok(env)
}

/// Fail closed on a composition that the external build cannot use.
fn check_complete(env: &BuildEnvironment) -> Result<(), RecipeError> {
    if let Some(fpp) = env.get("FPP") {
        if fpp == GENERIC_FPP {
            return Err(RecipeError::GenericPreprocessor {
                value: fpp.to_string(),
            });
        }
    }

    // FPP is a full path from here on, so configure leaves PPFLAGS to us.
    for var in REQUIRED_VARS {
        if !env.contains(var) {
            return Err(RecipeError::EnvironmentIncomplete {
                variable: var.to_string(),
            });
        }
    }

    Ok(())
}

fn reject_host_tuning(var: &str, flags: &str) -> Result<(), RecipeError> {
    match flags
        .split_whitespace()
        .find(|flag| HOST_TUNED_FLAGS.contains(flag))
    {
        Some(flag) => Err(RecipeError::invalid(format!(
            "{} contains host-specific `{}`; built artifacts must run on any machine",
            var, flag
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::toolchain::CompilerFamily;
    use crate::core::recipe::WrapperKind;

    fn genesis_spec() -> EnvironmentSpec {
        EnvironmentSpec {
            wrapper: WrapperKind::OpenMpi,
            cflags: "-O3".into(),
            fflags: "-O3 -ffree-line-length-none -fallow-argument-mismatch".into(),
            fcflags: None,
            lapack_libs: Some("-L/opt/openblas/lib -lopenblas".into()),
            ppflags: "-traditional-cpp -traditional".into(),
            overrides: BTreeMap::new(),
        }
    }

    fn gnu(major: u32) -> ToolchainInfo {
        ToolchainInfo::new(CompilerFamily::Gnu, major, "/opt/gcc/bin")
    }

    #[test]
    fn test_compose_openmpi_over_gnu() {
        let env = compose(&gnu(15), &genesis_spec()).unwrap();

        assert_eq!(env.get("OMPI_CC"), Some("gcc-15"));
        assert_eq!(env.get("OMPI_CXX"), Some("g++-15"));
        assert_eq!(env.get("OMPI_FC"), Some("gfortran-15"));
        assert_eq!(env.get("CC"), Some("mpicc"));
        assert_eq!(env.get("CXX"), Some("mpicxx"));
        assert_eq!(env.get("FC"), Some("mpif90"));
        assert_eq!(env.get("F77"), Some("mpif90"));
        assert_eq!(env.get("FCFLAGS"), env.get("FFLAGS"));
        assert_eq!(env.get("FPP"), Some("/opt/gcc/bin/cpp-15"));
        assert_eq!(env.get("PPFLAGS"), Some("-traditional-cpp -traditional"));
        for var in REQUIRED_VARS {
            assert!(env.contains(var), "{} missing", var);
        }
    }

    #[test]
    fn test_compose_is_deterministic() {
        let a = compose(&gnu(15), &genesis_spec()).unwrap();
        let b = compose(&gnu(15), &genesis_spec()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_version_change_only_changes_suffix() {
        let v15 = compose(&gnu(15), &genesis_spec()).unwrap();
        let v14 = compose(&gnu(14), &genesis_spec()).unwrap();

        assert_eq!(v15.len(), v14.len());
        for (key, value) in v15.iter() {
            assert_eq!(
                value.replace("-15", "-14"),
                v14.get(key).unwrap_or_default(),
                "{}",
                key
            );
        }
        assert_eq!(v14.get("OMPI_CC"), Some("gcc-14"));
    }

    #[test]
    fn test_overrides_win() {
        let mut spec = genesis_spec();
        spec.overrides.insert("CFLAGS".into(), "-O2".into());
        spec.overrides.insert("OMPI_CC".into(), "gcc-13".into());

        let env = compose(&gnu(15), &spec).unwrap();
        assert_eq!(env.get("CFLAGS"), Some("-O2"));
        assert_eq!(env.get("OMPI_CC"), Some("gcc-13"));
    }

    #[test]
    fn test_missing_lapack_fails_closed() {
        let mut spec = genesis_spec();
        spec.lapack_libs = None;

        let err = compose(&gnu(15), &spec).unwrap_err();
        assert!(matches!(
            err,
            RecipeError::EnvironmentIncomplete { ref variable } if variable == "LAPACK_LIBS"
        ));
    }

    #[test]
    fn test_generic_preprocessor_is_rejected() {
        let mut spec = genesis_spec();
        spec.overrides.insert("FPP".into(), "cpp".into());

        let err = compose(&gnu(15), &spec).unwrap_err();
        assert!(matches!(err, RecipeError::GenericPreprocessor { .. }));
    }

    #[test]
    fn test_preprocessor_path_named_cpp_is_accepted() {
        let mut spec = genesis_spec();
        spec.overrides.insert("FPP".into(), "/usr/bin/cpp".into());
        assert!(compose(&gnu(15), &spec).is_ok());
    }

    #[test]
    fn test_native_flags_are_rejected() {
        let mut spec = genesis_spec();
        spec.fflags = "-O3 -march=native -ffast-math".into();

        let err = compose(&gnu(15), &spec).unwrap_err();
        assert!(err.to_string().contains("-march=native"));
    }

    #[test]
    fn test_mpich_delegation() {
        let mut spec = genesis_spec();
        spec.wrapper = WrapperKind::Mpich;

        let env = compose(&gnu(15), &spec).unwrap();
        assert_eq!(env.get("MPICH_FC"), Some("gfortran-15"));
        assert!(!env.contains("OMPI_FC"));
    }

    #[test]
    fn test_no_wrapper_uses_raw_compilers() {
        let mut spec = genesis_spec();
        spec.wrapper = WrapperKind::None;

        let env = compose(&gnu(15), &spec).unwrap();
        assert_eq!(env.get("CC"), Some("gcc-15"));
        assert_eq!(env.get("F77"), Some("gfortran-15"));
    }
}
