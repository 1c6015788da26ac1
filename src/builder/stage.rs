//! Fixture staging into the installed share directory.
//!
//! Verification drivers find their inputs by path relative to their own
//! working directory, so each mapping keeps its relative layout exactly.

use std::path::{Path, PathBuf};

use crate::core::error::RecipeError;
use crate::core::recipe::FixtureMapping;
use crate::util::fs::{copy_dir_all, copy_file, is_contained_relative};

/// Copy every fixture from `source_root` to `destination_root`.
///
/// All mappings are checked before anything is copied, so a missing source
/// aborts staging with nothing written. Directory sources are copied
/// recursively. Returns the files written.
pub fn stage(
    mappings: &[FixtureMapping],
    source_root: &Path,
    destination_root: &Path,
) -> Result<Vec<PathBuf>, RecipeError> {
    for mapping in mappings {
        if !is_contained_relative(&mapping.destination) {
            return Err(RecipeError::FixtureDestinationInvalid {
                path: mapping.destination.clone(),
            });
        }
        let src = source_root.join(&mapping.source);
        if !src.exists() {
            return Err(RecipeError::FixtureSourceMissing { path: src });
        }
    }

    let mut written = Vec::new();
    for mapping in mappings {
        let src = source_root.join(&mapping.source);
        let dst = destination_root.join(&mapping.destination);

        if src.is_dir() {
            written.extend(copy_dir_all(&src, &dst)?);
        } else {
            copy_file(&src, &dst)?;
            written.push(dst);
        }
        tracing::debug!(
            "staged {} -> {}",
            mapping.source.display(),
            mapping.destination.display()
        );
    }

    tracing::info!(
        "staged {} fixture file(s) into {}",
        written.len(),
        destination_root.display()
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    use crate::core::recipe::Recipe;
    use crate::test_support::{SourceTreeFixture, GENESIS_RECIPE};

    fn mapping(source: &str, destination: &str) -> FixtureMapping {
        FixtureMapping {
            source: PathBuf::from(source),
            destination: PathBuf::from(destination),
        }
    }

    #[test]
    fn test_relative_path_is_preserved() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("param")).unwrap();
        fs::write(src.path().join("param/x.prm"), "BONDS\nCT1 CT1 222.5 1.5\n").unwrap();

        stage(&[mapping("param/x.prm", "param/x.prm")], src.path(), dst.path()).unwrap();

        assert_eq!(
            fs::read(dst.path().join("param/x.prm")).unwrap(),
            fs::read(src.path().join("param/x.prm")).unwrap()
        );
    }

    #[test]
    fn test_missing_source_writes_nothing() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("test.py"), "").unwrap();

        let err = stage(
            &[
                mapping("test.py", "regression_test/test.py"),
                mapping("genesis.py", "regression_test/genesis.py"),
            ],
            src.path(),
            dst.path(),
        )
        .unwrap_err();

        assert!(matches!(err, RecipeError::FixtureSourceMissing { .. }));
        assert!(!dst.path().join("regression_test").exists());
    }

    #[test]
    fn test_escaping_destination_is_rejected() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("test.py"), "").unwrap();

        let err = stage(&[mapping("test.py", "../test.py")], src.path(), dst.path()).unwrap_err();
        assert!(matches!(err, RecipeError::FixtureDestinationInvalid { .. }));
    }

    #[test]
    fn test_reference_layout() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        SourceTreeFixture::genesis().write_to(src.path()).unwrap();
        let recipe = Recipe::parse(GENESIS_RECIPE).unwrap();

        stage(&recipe.fixtures, src.path(), dst.path()).unwrap();

        let rt = dst.path().join("regression_test");
        assert!(rt.join("test.py").is_file());
        assert!(rt.join("genesis.py").is_file());
        assert!(rt.join("param/par_all27_prot_lipid.prm").is_file());
        assert!(rt.join("param/top_all27_prot_lipid.rtf").is_file());
        assert!(rt.join("build/jac_param27/jac_param27.pdb").is_file());
        assert!(rt.join("test_atdyn/jac_param27/CUTOFF/inp").is_file());
        assert!(rt.join("test_spdyn/jac_param27/PME_opt_1dalltoall/inp").is_file());
    }
}
