//! The deploy state record written by `leafpress deploy`. Read-only here.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployStateRecord {
    #[serde(default)]
    pub last_deploy: Option<LastDeploy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastDeploy {
    /// ISO-8601 timestamp.
    pub timestamp: String,
    #[serde(default)]
    pub url: String,
    /// Leading-slash source path to content digest, in record order.
    #[serde(default)]
    pub source_files: IndexMap<String, String>,
}

impl DeployStateRecord {
    /// Load the record. A missing or unreadable file means "never deployed".
    pub fn load(path: &Path) -> Option<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(content.trim_start_matches('\u{feff}')) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Ignoring unparsable {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn load_last_deploy(path: &Path) -> Option<LastDeploy> {
        Self::load(path).and_then(|record| record.last_deploy)
    }
}

impl LastDeploy {
    pub fn deployed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|at| at.with_timezone(&Utc))
    }

    /// "Last deployed 5 minutes ago".
    pub fn summary(&self, now: DateTime<Utc>) -> String {
        match self.deployed_at() {
            Some(at) => format!("Last deployed {}", format_relative(at, now)),
            None => format!("Last deployed {}", self.timestamp),
        }
    }
}

pub fn format_relative(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }

    let (value, unit) = match seconds {
        s if s < 3_600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3_600, "hour"),
        s => (s / 86_400, "day"),
    };
    let plural = if value == 1 { "" } else { "s" };
    format!("{value} {unit}{plural} ago")
}
