//! Centralized path utilities for the launcher.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// File name of the site configuration record at the content root.
pub const SITE_CONFIG_FILE: &str = "leafpress.json";

/// File name of the deploy state record written by `leafpress deploy`.
pub const DEPLOY_STATE_FILE: &str = "leafpress-deploy.json";

/// Launcher settings file inside the install directory.
const LAUNCHER_CONFIG_FILE: &str = "config.toml";

/// Filesystem layout of one launcher context.
///
/// `install_dir` holds launcher-owned state (settings and the managed binary),
/// `content_root` is the note directory the binary builds from.
#[derive(Debug, Clone)]
pub struct LauncherPaths {
    install_dir: PathBuf,
    content_root: PathBuf,
}

impl LauncherPaths {
    pub fn new(install_dir: impl Into<PathBuf>, content_root: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            content_root: content_root.into(),
        }
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    /// Directory archives are extracted into (`<install-dir>/bin`).
    pub fn bin_dir(&self) -> PathBuf {
        self.install_dir.join("bin")
    }

    pub fn config_path(&self) -> PathBuf {
        self.install_dir.join(LAUNCHER_CONFIG_FILE)
    }

    pub fn site_config_path(&self) -> PathBuf {
        self.content_root.join(SITE_CONFIG_FILE)
    }

    pub fn deploy_state_path(&self) -> PathBuf {
        self.content_root.join(DEPLOY_STATE_FILE)
    }

    /// Install directory relative to the content root, when it lives inside it.
    ///
    /// Used to keep the launcher's own files out of the source hash manifest.
    pub fn install_dir_within_content(&self) -> Option<PathBuf> {
        self.install_dir
            .strip_prefix(&self.content_root)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(Path::to_path_buf)
    }

    /// Ensure the launcher-owned directories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.install_dir.clone(), self.bin_dir()] {
            fs::create_dir_all(&dir).map_err(|e| {
                AppError::io(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

/// Default install directory (`<platform data dir>/leafpress-launcher`).
pub fn default_install_dir() -> Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| AppError::config("Cannot find a data or home directory"))?;
    Ok(base.join("leafpress-launcher"))
}

/// Expand a leading `~` to the user's home directory. Other paths are returned as-is.
pub fn expand_home(raw: &str) -> PathBuf {
    let home = dirs::home_dir();
    match (raw, home) {
        ("~", Some(home)) => home,
        (_, Some(home)) if raw.starts_with("~/") || raw.starts_with("~\\") => home.join(&raw[2..]),
        _ => PathBuf::from(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_leading_tilde_only() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_home("~"), home);
        assert_eq!(expand_home("~/bin/leafpress"), home.join("bin/leafpress"));
        assert_eq!(expand_home("/opt/~/leafpress"), PathBuf::from("/opt/~/leafpress"));
        assert_eq!(expand_home("~other/x"), PathBuf::from("~other/x"));
    }

    #[test]
    fn install_dir_inside_content_root_is_reported() {
        let paths = LauncherPaths::new("/vault/.obsidian/plugins/leafpress", "/vault");
        assert_eq!(
            paths.install_dir_within_content(),
            Some(PathBuf::from(".obsidian/plugins/leafpress"))
        );

        let outside = LauncherPaths::new("/data/leafpress", "/vault");
        assert_eq!(outside.install_dir_within_content(), None);
    }

    #[test]
    fn managed_layout() {
        let paths = LauncherPaths::new("/data/lp", "/vault");
        assert_eq!(paths.bin_dir(), PathBuf::from("/data/lp/bin"));
        assert_eq!(paths.config_path(), PathBuf::from("/data/lp/config.toml"));
        assert_eq!(
            paths.deploy_state_path(),
            PathBuf::from("/vault/leafpress-deploy.json")
        );
    }
}
