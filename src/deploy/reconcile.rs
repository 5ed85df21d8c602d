//! Pending-change detection: current source digests against the last deploy.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use walkdir::WalkDir;

use super::hash::{hash_file, SOURCE_HASH_ALGORITHM};
use super::state::DeployStateRecord;
use crate::error::Result;
use crate::paths::{LauncherPaths, DEPLOY_STATE_FILE, SITE_CONFIG_FILE};
use crate::site_config::SiteConfig;

/// Manifest key the site configuration digest is stored under.
pub const CONFIG_HASH_PATH: &str = "/__leafpress_config__";

/// Display cap for pending entries; the count always reflects the full total.
pub const MAX_PENDING_DISPLAY: usize = 50;

const VCS_DIR: &str = ".git";

/// OS artifacts that never count as notes.
const SKIP_FILES: [&str; 3] = [".DS_Store", "Thumbs.db", "desktop.ini"];

/// Path-to-digest manifest that remembers insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceHashes {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl SourceHashes {
    /// Insert or replace, keeping the original position of an existing path.
    pub fn insert(&mut self, path: impl Into<String>, digest: impl Into<String>) {
        let path = path.into();
        let digest = digest.into();
        match self.index.get(&path) {
            Some(&position) => self.entries[position].1 = digest,
            None => {
                self.index.insert(path.clone(), self.entries.len());
                self.entries.push((path, digest));
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.index
            .get(path)
            .map(|&position| self.entries[position].1.as_str())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(path, digest)| (path.as_str(), digest.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SourceHashes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut hashes = Self::default();
        for (path, digest) in iter {
            hashes.insert(path, digest);
        }
        hashes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingFile {
    pub status: PendingStatus,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingSummary {
    /// At most [`MAX_PENDING_DISPLAY`] entries.
    pub files: Vec<PendingFile>,
    pub pending_count: usize,
    pub truncated: bool,
}

impl PendingSummary {
    pub fn from_pending(mut pending: Vec<PendingFile>) -> Self {
        let pending_count = pending.len();
        let truncated = pending_count > MAX_PENDING_DISPLAY;
        pending.truncate(MAX_PENDING_DISPLAY);
        Self {
            files: pending,
            pending_count,
            truncated,
        }
    }
}

/// Filters deciding which files under the content root are sources.
struct SourceFilter {
    output_dir: String,
    install_dir: Option<String>,
    ignore: Vec<String>,
}

impl SourceFilter {
    fn new(paths: &LauncherPaths, site: &SiteConfig) -> Self {
        Self {
            output_dir: site.output_dir_normalized(),
            install_dir: paths
                .install_dir_within_content()
                .map(|rel| to_slash(&rel)),
            ignore: site
                .ignore
                .iter()
                .map(|pattern| pattern.trim().to_string())
                .filter(|pattern| !pattern.is_empty())
                .collect(),
        }
    }

    /// `rel` is slash-separated and relative to the content root.
    fn excludes(&self, rel: &str, name: &str, is_dir: bool) -> bool {
        if name.starts_with('.') || name == VCS_DIR {
            return true;
        }
        if is_under(rel, &self.output_dir) {
            return true;
        }
        if let Some(install_dir) = &self.install_dir {
            if is_under(rel, install_dir) {
                return true;
            }
        }
        if !is_dir
            && (SKIP_FILES.contains(&name)
                || rel == DEPLOY_STATE_FILE
                || rel == SITE_CONFIG_FILE)
        {
            return true;
        }

        let keyed = format!("/{rel}");
        self.ignore.iter().any(|pattern| keyed.contains(pattern.as_str()))
    }
}

fn is_under(rel: &str, dir: &str) -> bool {
    !dir.is_empty()
        && rel
            .strip_prefix(dir)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Digest every source file under the content root, plus the site configuration.
///
/// Entries are enumerated in file-name order within each directory.
pub fn compute_source_hashes(paths: &LauncherPaths, site: &SiteConfig) -> Result<SourceHashes> {
    let root = paths.content_root();
    let filter = SourceFilter::new(paths, site);
    let mut hashes = SourceHashes::default();

    let mut iter = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
        .into_iter();

    while let Some(entry) = iter.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable source entry: {}", e);
                continue;
            }
        };

        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = to_slash(rel);
        let name = entry.file_name().to_string_lossy();
        let is_dir = entry.file_type().is_dir();

        if filter.excludes(&rel, &name, is_dir) {
            if is_dir {
                iter.skip_current_dir();
            }
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        match hash_file(entry.path()) {
            Ok(digest) => hashes.insert(format!("/{rel}"), digest),
            Err(e) => log::warn!("Skipping {}: {}", rel, e),
        }
    }

    let site_config_path = paths.site_config_path();
    if site_config_path.is_file() {
        hashes.insert(CONFIG_HASH_PATH, hash_file(&site_config_path)?);
    }

    Ok(hashes)
}

/// Classify every path that differs between `current` and `deployed`.
///
/// Added and modified entries follow `current`'s order, then deleted entries
/// follow `deployed`'s order.
pub fn diff(current: &SourceHashes, deployed: &SourceHashes) -> Vec<PendingFile> {
    let mut pending = Vec::new();

    for (path, digest) in current.iter() {
        let status = match deployed.get(path) {
            None => PendingStatus::Added,
            Some(previous) if !previous.eq_ignore_ascii_case(digest) => PendingStatus::Modified,
            Some(_) => continue,
        };
        pending.push(PendingFile {
            status,
            path: path.to_string(),
        });
    }

    for (path, _) in deployed.iter() {
        if !current.contains(path) {
            pending.push(PendingFile {
                status: PendingStatus::Deleted,
                path: path.to_string(),
            });
        }
    }

    pending
}

/// Pending changes since the last deploy. Without a deploy record everything is added.
pub fn pending_changes(paths: &LauncherPaths, site: &SiteConfig) -> Result<PendingSummary> {
    let current = compute_source_hashes(paths, site)?;
    let deployed: SourceHashes = DeployStateRecord::load_last_deploy(&paths.deploy_state_path())
        .map(|last| last.source_files.into_iter().collect())
        .unwrap_or_default();

    if let Some((path, digest)) = deployed
        .iter()
        .find(|(_, digest)| !SOURCE_HASH_ALGORITHM.is_digest(digest))
    {
        log::warn!(
            "Deploy record digest for {} ({}) is not {:?}; every file may show as modified",
            path,
            digest,
            SOURCE_HASH_ALGORITHM
        );
    }

    Ok(PendingSummary::from_pending(diff(&current, &deployed)))
}
