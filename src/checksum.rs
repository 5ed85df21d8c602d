//! Release checksum manifest lookup and SHA-256 verification.

use sha2::{Digest as _, Sha256};

use crate::download::fetch_text;
use crate::error::Result;
use crate::github::{GitHubAsset, ReleaseFetcher};

/// Manifest names checked before falling back to any asset containing "checksum".
const MANIFEST_NAMES: [&str; 2] = ["checksums.txt", "SHA256SUMS"];

/// Outcome of checking a downloaded asset against the release manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumStatus {
    Verified,
    Mismatch { expected: String, actual: String },
    /// No manifest, or the manifest has no entry for the asset.
    Unavailable,
}

impl ChecksumStatus {
    /// `Some(true)` verified, `Some(false)` mismatch, `None` when nothing to verify against.
    pub fn as_option(&self) -> Option<bool> {
        match self {
            Self::Verified => Some(true),
            Self::Mismatch { .. } => Some(false),
            Self::Unavailable => None,
        }
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Locate the checksum manifest among a release's assets.
pub fn find_manifest_asset(assets: &[GitHubAsset]) -> Option<&GitHubAsset> {
    MANIFEST_NAMES
        .iter()
        .find_map(|name| assets.iter().find(|asset| asset.name == *name))
        .or_else(|| {
            assets
                .iter()
                .find(|asset| asset.name.to_ascii_lowercase().contains("checksum"))
        })
}

/// Expected hash for `asset_name` from `<hex-hash> <filename>` lines.
///
/// Tolerates extra whitespace and the `*` binary-mode marker `sha256sum` emits.
pub fn expected_hash<'a>(manifest: &'a str, asset_name: &str) -> Option<&'a str> {
    manifest.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let hash = fields.next()?;
        let file = fields.next()?;
        let file = file.strip_prefix('*').unwrap_or(file);
        (file == asset_name).then_some(hash)
    })
}

/// Compare an already computed SHA-256 digest against the manifest entry.
pub fn verify_digest(manifest: &str, asset_name: &str, actual_sha256: &str) -> ChecksumStatus {
    match expected_hash(manifest, asset_name) {
        Some(expected) if expected.eq_ignore_ascii_case(actual_sha256) => ChecksumStatus::Verified,
        Some(expected) => ChecksumStatus::Mismatch {
            expected: expected.to_ascii_lowercase(),
            actual: actual_sha256.to_ascii_lowercase(),
        },
        None => ChecksumStatus::Unavailable,
    }
}

pub fn verify_bytes(manifest: &str, asset_name: &str, data: &[u8]) -> ChecksumStatus {
    verify_digest(manifest, asset_name, &sha256_hex(data))
}

/// Fetch the release manifest (if any) and check the asset digest against it.
pub async fn verify_checksum(
    fetcher: &ReleaseFetcher,
    assets: &[GitHubAsset],
    asset_name: &str,
    actual_sha256: &str,
) -> Result<ChecksumStatus> {
    let Some(manifest_asset) = find_manifest_asset(assets) else {
        log::warn!(
            "Release has no checksum manifest, skipping verification of {}",
            asset_name
        );
        return Ok(ChecksumStatus::Unavailable);
    };

    let manifest = fetch_text(fetcher.client(), &fetcher.asset_url(manifest_asset)).await?;
    let status = verify_digest(&manifest, asset_name, actual_sha256);
    match &status {
        ChecksumStatus::Verified => log::info!("Checksum verified for {}", asset_name),
        ChecksumStatus::Mismatch { expected, actual } => log::error!(
            "Checksum mismatch for {}: expected {}, got {}",
            asset_name,
            expected,
            actual
        ),
        ChecksumStatus::Unavailable => log::warn!(
            "{} has no entry for {}, skipping verification",
            manifest_asset.name,
            asset_name
        ),
    }
    Ok(status)
}
