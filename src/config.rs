use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Port `leafpress serve` listens on unless configured otherwise.
pub const DEFAULT_PREVIEW_PORT: u16 = 3000;

/// Where the leafpress executable comes from.
///
/// A custom path is authoritative and never auto-updated; the managed binary
/// lives under the install directory and is downloaded on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BinarySource {
    #[default]
    Managed,
    Custom { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default)]
    pub binary: BinarySource,
    #[serde(default = "default_preview_port")]
    pub preview_port: u16,
    #[serde(default)]
    pub github_proxy: String,
    #[serde(default = "default_true")]
    pub check_updates_on_start: bool,
}

fn default_true() -> bool {
    true
}

fn default_preview_port() -> u16 {
    DEFAULT_PREVIEW_PORT
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            binary: BinarySource::Managed,
            preview_port: DEFAULT_PREVIEW_PORT,
            github_proxy: String::new(),
            check_updates_on_start: true,
        }
    }
}

/// Cached, lock-protected access to `config.toml`.
pub struct ConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    cache: RwLock<Arc<LauncherConfig>>,
}

impl ConfigStore {
    /// Open the store, writing defaults to disk when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = load_config_from_disk(&path)?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            cache: RwLock::new(Arc::new(config)),
        })
    }

    pub fn load(&self) -> Arc<LauncherConfig> {
        let config = self.cache.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&config)
    }

    /// Execute a read-modify-write operation on the config file while holding a lock.
    /// This prevents concurrent modifications from causing data loss.
    pub fn with_config_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut LauncherConfig) -> Result<T>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.load();

        let mut updated = (*current).clone();
        let result = f(&mut updated)?;
        save_config_to_disk(&self.path, &updated)?;

        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(updated);

        Ok(result)
    }
}

fn load_config_from_disk(path: &Path) -> Result<LauncherConfig> {
    if !path.exists() {
        let config = LauncherConfig::default();
        save_config_to_disk(path, &config)?;
        return Ok(config);
    }
    let content = fs::read_to_string(path).map_err(|e| AppError::config(e.to_string()))?;
    toml::from_str(&content).map_err(|e| AppError::config(e.to_string()))
}

fn save_config_to_disk(path: &Path, config: &LauncherConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::io(e.to_string()))?;
    }
    let content = toml::to_string_pretty(config).map_err(|e| AppError::config(e.to_string()))?;
    fs::write(path, content).map_err(|e| AppError::config(e.to_string()))
}
