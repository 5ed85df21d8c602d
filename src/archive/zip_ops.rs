use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};

use super::path::{detect_common_top_dir, parse_entry_rel_path, strip_common_top_dir};
use super::write_entry;

/// Extract a zip archive to `dest_dir`, stripping a shared top-level directory.
pub(super) fn extract_zip_flat(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)
        .map_err(|e| AppError::extraction(format!("failed to open {archive_path:?}: {e}")))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| AppError::extraction(e.to_string()))?;
    let top_dir = detect_common_top_dir(archive.file_names());

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| AppError::extraction(e.to_string()))?;

        let raw_name = entry.name().to_string();
        let relative = parse_entry_rel_path(&raw_name).ok_or_else(|| {
            AppError::extraction(format!("archive contains unsafe zip path: {raw_name:?}"))
        })?;
        let Some(relative) = strip_common_top_dir(&relative, top_dir.as_deref()) else {
            continue;
        };

        if entry.is_symlink() {
            log::warn!("Skipping symlink {:?} in release archive", raw_name);
            continue;
        }

        let is_dir = entry.is_dir();
        let unix_mode = entry.unix_mode();
        write_entry(&dest_dir.join(relative), is_dir, &mut entry, unix_mode)?;
    }

    Ok(())
}
