//! Release archive extraction.

mod path;
mod tar_gz;
mod zip_ops;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Owner rwx, group/other r-x.
#[cfg(unix)]
const EXECUTABLE_MODE: u32 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Extract a release archive into `dest_dir` and return the path of the executable.
///
/// A single top-level directory shared by every entry is stripped so the
/// executable lands directly in `dest_dir`.
pub fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
    executable_name: &str,
) -> Result<PathBuf> {
    let kind = ArchiveKind::from_path(archive_path).ok_or_else(|| {
        AppError::extraction(format!("unsupported archive format: {}", archive_path.display()))
    })?;

    fs::create_dir_all(dest_dir)
        .map_err(|e| AppError::extraction(format!("failed to create {dest_dir:?}: {e}")))?;

    match kind {
        ArchiveKind::TarGz => tar_gz::extract_tar_gz_flat(archive_path, dest_dir)?,
        ArchiveKind::Zip => zip_ops::extract_zip_flat(archive_path, dest_dir)?,
    }

    let executable = dest_dir.join(executable_name);
    if !executable.is_file() {
        return Err(AppError::extraction(format!(
            "archive did not contain {executable_name}"
        )));
    }

    #[cfg(unix)]
    set_unix_permissions(&executable, Some(EXECUTABLE_MODE))?;

    log::info!("Extracted {} to {}", archive_path.display(), executable.display());
    Ok(executable)
}

#[cfg(unix)]
fn set_unix_permissions(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
            AppError::extraction(format!("failed to set permissions on {path:?}: {e}"))
        })?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_unix_permissions(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

/// Write one archive entry, creating parent directories as needed.
fn write_entry<R>(out_path: &Path, is_dir: bool, reader: &mut R, unix_mode: Option<u32>) -> Result<()>
where
    R: io::Read,
{
    if is_dir {
        fs::create_dir_all(out_path).map_err(|e| {
            AppError::extraction(format!("failed to create directory {out_path:?}: {e}"))
        })?;
        return Ok(());
    }

    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::extraction(format!("failed to create directory {parent:?}: {e}"))
        })?;
    }

    // Replace rather than truncate so a running executable is never rewritten in place.
    if out_path.exists() {
        fs::remove_file(out_path)
            .map_err(|e| AppError::extraction(format!("failed to replace {out_path:?}: {e}")))?;
    }

    let mut outfile = fs::File::create(out_path)
        .map_err(|e| AppError::extraction(format!("failed to create {out_path:?}: {e}")))?;
    io::copy(reader, &mut outfile)
        .map_err(|e| AppError::extraction(format!("failed to write {out_path:?}: {e}")))?;
    set_unix_permissions(out_path, unix_mode)
}
