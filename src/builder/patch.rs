//! Single-occurrence textual patching of the unpacked source tree.
//!
//! This is not a diff engine: each [`PatchSpec`] replaces one
//! exact occurrence of a search string. The file is rewritten atomically and
//! left untouched on any error.

use std::path::Path;

use crate::core::error::RecipeError;
use crate::core::recipe::PatchSpec;
use crate::util::fs::{read_to_string, write_atomic};

/// Apply every patch in order, stopping at the first failure.
pub fn apply_patches(source_root: &Path, patches: &[PatchSpec]) -> Result<(), RecipeError> {
    for patch in patches {
        apply_patch(source_root, patch)?;
    }
    Ok(())
}

/// Apply a single patch under `source_root`.
pub fn apply_patch(source_root: &Path, patch: &PatchSpec) -> Result<(), RecipeError> {
    let path = source_root.join(&patch.file);
    if !path.is_file() {
        return Err(RecipeError::PatchTargetMissing { path });
    }

    let original = read_to_string(&path)?;
    let patched = substitute(&original, patch).map_err(|kind| kind.into_error(&path, patch))?;
    write_atomic(&path, patched.as_bytes())?;

    tracing::info!("patched {}", patch.file.display());
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Mismatch {
    /// No match; records whether the replacement text is already in the file
    NotFound { replacement_present: bool },
    Ambiguous(usize),
    AlreadyApplied,
}

impl Mismatch {
    fn into_error(self, path: &Path, patch: &PatchSpec) -> RecipeError {
        let path = path.to_path_buf();
        let search = patch.search.clone();
        match self {
            Mismatch::NotFound {
                replacement_present,
            } => RecipeError::PatchMatchNotFound {
                path,
                search,
                replacement_present,
            },
            Mismatch::Ambiguous(count) => RecipeError::PatchMatchAmbiguous {
                path,
                search,
                count,
            },
            Mismatch::AlreadyApplied => RecipeError::PatchAlreadyApplied { path, search },
        }
    }
}

/// Byte offsets of every occurrence of `needle`, overlapping ones included.
fn match_positions(haystack: &str, needle: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    if needle.is_empty() {
        return positions;
    }

    let mut from = 0;
    while let Some(i) = haystack[from..].find(needle) {
        let at = from + i;
        positions.push(at);
        from = at + haystack[at..].chars().next().map_or(1, char::len_utf8);
    }
    positions
}

/// Compute the patched text without touching the filesystem.
fn substitute(text: &str, patch: &PatchSpec) -> Result<String, Mismatch> {
    let search = patch.search.as_str();
    let replace = patch.replace.as_str();
    let matches = match_positions(text, search);

    // When the replacement contains the search text, a patched file still
    // matches; each such match sits at one of these offsets into a copy of
    // `replace`.
    let offsets = match_positions(replace, search);
    let covered = |at: usize| {
        offsets.iter().any(|&off| {
            at >= off && text.get(at - off..).is_some_and(|t| t.starts_with(replace))
        })
    };
    let not_found = || Mismatch::NotFound {
        replacement_present: !replace.is_empty() && text.contains(replace),
    };

    let target = match (matches.len(), patch.occurrence) {
        (0, _) => return Err(not_found()),
        (n, None) if n > 1 => {
            if matches.iter().all(|&at| covered(at)) {
                return Err(Mismatch::AlreadyApplied);
            }
            return Err(Mismatch::Ambiguous(n));
        }
        (_, None) => matches[0],
        (n, Some(k)) if k == 0 || k > n => return Err(not_found()),
        (_, Some(k)) => matches[k - 1],
    };

    if covered(target) {
        return Err(Mismatch::AlreadyApplied);
    }

    let mut out = String::with_capacity(text.len() + replace.len());
    out.push_str(&text[..target]);
    out.push_str(replace);
    out.push_str(&text[target + search.len()..]);
    Ok(out)
}
