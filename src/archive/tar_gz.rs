use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};

use super::path::{detect_common_top_dir, parse_entry_rel_path, strip_common_top_dir};
use super::write_entry;

fn open_archive(archive_path: &Path) -> Result<tar::Archive<flate2::read::GzDecoder<fs::File>>> {
    let file = fs::File::open(archive_path)
        .map_err(|e| AppError::extraction(format!("failed to open {archive_path:?}: {e}")))?;
    Ok(tar::Archive::new(flate2::read::GzDecoder::new(file)))
}

fn entry_names(archive_path: &Path) -> Result<Vec<String>> {
    let mut archive = open_archive(archive_path)?;
    let mut names = Vec::new();
    for entry in archive
        .entries()
        .map_err(|e| AppError::extraction(e.to_string()))?
    {
        let entry = entry.map_err(|e| AppError::extraction(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| AppError::extraction(e.to_string()))?;
        if let Some(name) = path.to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Extract a tar.gz archive to `dest_dir`, stripping a shared top-level directory.
pub(super) fn extract_tar_gz_flat(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    // First pass: find the common top-level directory.
    let names = entry_names(archive_path)?;
    let top_dir = detect_common_top_dir(names.iter().map(String::as_str));

    let mut archive = open_archive(archive_path)?;
    for entry in archive
        .entries()
        .map_err(|e| AppError::extraction(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| AppError::extraction(e.to_string()))?;

        let raw_path = {
            let entry_path = entry
                .path()
                .map_err(|e| AppError::extraction(e.to_string()))?;
            entry_path
                .to_str()
                .ok_or_else(|| {
                    AppError::extraction(format!(
                        "archive entry path is not valid UTF-8: {entry_path:?}"
                    ))
                })?
                .to_string()
        };

        let relative = parse_entry_rel_path(&raw_path).ok_or_else(|| {
            AppError::extraction(format!("archive contains unsafe entry path: {raw_path:?}"))
        })?;
        let Some(relative) = strip_common_top_dir(&relative, top_dir.as_deref()) else {
            continue;
        };
        let out_path = dest_dir.join(relative);

        let entry_type = entry.header().entry_type();
        if !entry_type.is_dir() && !entry_type.is_file() {
            log::warn!("Skipping {:?} entry {:?} in release archive", entry_type, raw_path);
            continue;
        }

        let unix_mode = entry.header().mode().ok();
        write_entry(&out_path, entry_type.is_dir(), &mut entry, unix_mode)?;
    }

    Ok(())
}
