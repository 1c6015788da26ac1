//! Filesystem utilities.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::core::error::RecipeError;

/// Recursively copy a directory, preserving its relative layout.
///
/// Returns the files written, in traversal order.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<Vec<PathBuf>, RecipeError> {
    let mut written = Vec::new();
    ensure_dir(dst)?;

    for entry in WalkDir::new(src).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let message = e.to_string();
            RecipeError::io(
                format!("failed to walk {}", src.display()),
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other(message)),
            )
        })?;

        // walkdir only yields paths under `src`
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else {
            copy_file(entry.path(), &target)?;
            written.push(target);
        }
    }

    Ok(written)
}

/// Copy one file, creating the destination's parent directories.
pub fn copy_file(src: &Path, dst: &Path) -> Result<(), RecipeError> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    fs::copy(src, dst).map_err(|e| {
        RecipeError::io(
            format!("failed to copy {} to {}", src.display(), dst.display()),
            e,
        )
    })?;
    Ok(())
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<(), RecipeError> {
    if !path.is_dir() {
        fs::create_dir_all(path).map_err(|e| {
            RecipeError::io(format!("failed to create directory: {}", path.display()), e)
        })?;
    }
    Ok(())
}

/// Read a file to string, with nice error messages.
pub fn read_to_string(path: &Path) -> Result<String, RecipeError> {
    fs::read_to_string(path)
        .map_err(|e| RecipeError::io(format!("failed to read file: {}", path.display()), e))
}

/// Replace a file's contents atomically.
///
/// The new contents are written to a temporary file next to `path` and
/// renamed over it, so readers never see a half-written file. The original
/// file's permissions are kept.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), RecipeError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let wrap = |e: std::io::Error| {
        RecipeError::io(format!("failed to write file: {}", path.display()), e)
    };

    let mut tmp = NamedTempFile::new_in(parent).map_err(wrap)?;
    tmp.write_all(contents).map_err(wrap)?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions()).map_err(wrap)?;
    }
    tmp.persist(path).map_err(|e| wrap(e.error))?;
    Ok(())
}

/// Whether `path` is relative and never climbs out of the directory it is joined to.
pub fn is_contained_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_dir_all_preserves_layout() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");

        fs::create_dir_all(src.join("jac_param27")).unwrap();
        fs::write(src.join("jac_param27/jac.pdb"), "ATOM").unwrap();
        fs::write(src.join("top.rtf"), "RESI").unwrap();

        let written = copy_dir_all(&src, &dst).unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(fs::read_to_string(dst.join("jac_param27/jac.pdb")).unwrap(), "ATOM");
        assert_eq!(fs::read_to_string(dst.join("top.rtf")).unwrap(), "RESI");
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("configure.ac");
        fs::write(&file, "old").unwrap();

        write_atomic(&file, b"new").unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "new");
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_is_contained_relative() {
        assert!(is_contained_relative(Path::new("regression_test/param/x.prm")));
        assert!(is_contained_relative(Path::new("./test.py")));
        assert!(!is_contained_relative(Path::new("../escape")));
        assert!(!is_contained_relative(Path::new("param/../../escape")));
        assert!(!is_contained_relative(Path::new("/etc/passwd")));
        assert!(!is_contained_relative(Path::new("")));
    }
}
