//! Test fixtures for common test scenarios.

use std::fs;
use std::path::{Path, PathBuf};

/// The bundled reference recipe.
pub const GENESIS_RECIPE: &str = include_str!("../../recipes/genesis.toml");

/// `configure.ac` excerpt with the broken `AC_ARG_ENABLE(qsimulate)`.
pub const CONFIGURE_AC: &str = r#"AC_INIT([genesis], [2.1.6.1])
AC_ARG_ENABLE([qsimulate],
  [AS_HELP_STRING([--enable-qsimulate], [enable QSimulate integration.])]
  [enable_qsimulate=yes])
AC_ARG_ENABLE([mpi],
  [AS_HELP_STRING([--enable-mpi], [enable MPI parallelization.])], ,
  [enable_mpi=no])
"#;

/// Unpacked source tree shaped like the reference package.
#[derive(Debug, Clone)]
pub struct SourceTreeFixture {
    /// Files to create (relative path, content).
    pub files: Vec<(PathBuf, String)>,
}

impl SourceTreeFixture {
    /// Tree containing `configure.ac` and the regression test data.
    pub fn genesis() -> Self {
        let rt = Path::new("tests/regression_test");
        let files = vec![
            (PathBuf::from("configure.ac"), CONFIGURE_AC.to_string()),
            (rt.join("test.py"), "import sys\n".to_string()),
            (rt.join("genesis.py"), "# helper\n".to_string()),
            (
                rt.join("param/par_all27_prot_lipid.prm"),
                "BONDS\n".to_string(),
            ),
            (
                rt.join("param/top_all27_prot_lipid.rtf"),
                "RESI ALA\n".to_string(),
            ),
            (
                rt.join("build/jac_param27/jac_param27.pdb"),
                "ATOM      1  N\n".to_string(),
            ),
            (
                rt.join("build/jac_param27/jac_param27.psf"),
                "PSF\n".to_string(),
            ),
            (
                rt.join("test_atdyn/jac_param27/CUTOFF/inp"),
                "[INPUT]\n".to_string(),
            ),
            (
                rt.join("test_spdyn/jac_param27/PME_opt_1dalltoall/inp"),
                "[INPUT]\n".to_string(),
            ),
        ];
        SourceTreeFixture { files }
    }

    /// Write all files under `root`.
    pub fn write_to(&self, root: &Path) -> std::io::Result<()> {
        for (rel, content) in &self.files {
            let path = root.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }
        Ok(())
    }
}
