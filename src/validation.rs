use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Resolve where a downloaded release asset is stored inside `bin_dir`.
///
/// Asset names come from the remote release index, so anything that could
/// address a file outside `bin_dir` is rejected.
pub fn resolve_archive_path(bin_dir: &Path, asset_name: &str) -> Result<PathBuf> {
    validate_asset_name(asset_name)?;

    let bin_dir_canonical = ensure_and_canonicalize_dir(bin_dir, "bin")?;
    let candidate = bin_dir_canonical.join(asset_name);

    if candidate.parent() != Some(bin_dir_canonical.as_path()) {
        return Err(AppError::download(
            asset_name,
            "asset path is outside the binary directory",
        ));
    }

    Ok(candidate)
}

fn validate_asset_name(name: &str) -> Result<()> {
    let is_safe = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'));

    if !is_safe {
        return Err(AppError::download(name, "unsafe asset name"));
    }

    Ok(())
}

fn ensure_and_canonicalize_dir(path: &Path, label: &str) -> Result<PathBuf> {
    fs::create_dir_all(path)
        .map_err(|e| AppError::io(format!("Failed to create {} dir: {}", label, e)))?;
    path.canonicalize()
        .map_err(|e| AppError::io(format!("Failed to resolve {} dir: {}", label, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_release_archive_names() {
        let temp = tempfile::tempdir().unwrap();
        let path =
            resolve_archive_path(temp.path(), "leafpress-v1.2.3-linux-amd64.tar.gz").unwrap();
        assert_eq!(
            path.file_name().unwrap(),
            "leafpress-v1.2.3-linux-amd64.tar.gz"
        );
        assert!(path.starts_with(temp.path().canonicalize().unwrap()));
    }

    #[test]
    fn rejects_traversal_and_separators() {
        let temp = tempfile::tempdir().unwrap();
        for bad in ["", "..", "../evil.tar.gz", "dir/evil.zip", "a\\b.zip", "sp ace.zip"] {
            assert!(
                resolve_archive_path(temp.path(), bad).is_err(),
                "accepted {bad:?}"
            );
        }
    }
}
