//! The `leafpress.json` site configuration record.
//!
//! Edited by the host's settings UI; the launcher itself only consumes
//! `ignore` and `outputDir` when reconciling pending changes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

const DEFAULT_OUTPUT_DIR: &str = "_site";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Value>,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    #[serde(default)]
    pub nav: Vec<NavItem>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeploySettings>,
    /// Keys this launcher does not model, kept so writes never drop them.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavItem {
    pub title: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploySettings {
    pub provider: String,
    #[serde(flatten)]
    pub options: BTreeMap<String, Value>,
}

fn default_output_dir() -> String {
    DEFAULT_OUTPUT_DIR.to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            theme: None,
            features: BTreeMap::new(),
            nav: Vec::new(),
            ignore: Vec::new(),
            output_dir: default_output_dir(),
            deploy: None,
            extra: BTreeMap::new(),
        }
    }
}

impl SiteConfig {
    /// Read the record, returning defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| AppError::config(format!("Failed to read {}: {}", path.display(), e)))?;
        let content = content.trim_start_matches('\u{feff}');
        let config: Self = serde_json::from_str(content)
            .map_err(|e| AppError::config(format!("Invalid {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate and write the record as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content + "\n")
            .map_err(|e| AppError::config(format!("Failed to write {}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        validate_output_dir(&self.output_dir)?;
        if self.ignore.iter().any(|pattern| pattern.trim().is_empty()) {
            return Err(AppError::config("ignore patterns must not be empty"));
        }
        if let Some(deploy) = &self.deploy {
            if deploy.provider.trim().is_empty() {
                return Err(AppError::config("deploy.provider must not be empty"));
            }
        }
        Ok(())
    }

    /// Output directory normalized to forward slashes without surrounding separators.
    pub fn output_dir_normalized(&self) -> String {
        self.output_dir
            .replace('\\', "/")
            .trim_matches('/')
            .trim_start_matches("./")
            .to_string()
    }
}

fn validate_output_dir(output_dir: &str) -> Result<()> {
    let trimmed = output_dir.trim();
    if trimmed.is_empty() {
        return Err(AppError::config("outputDir must not be empty"));
    }
    let path = Path::new(trimmed);
    let escapes = path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || path.is_absolute() {
        return Err(AppError::config(format!(
            "outputDir must be a relative path inside the content root: {trimmed}"
        )));
    }
    Ok(())
}
