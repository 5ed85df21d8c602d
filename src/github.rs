use std::sync::OnceLock;

use regex::Regex;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};

pub const LEAFPRESS_REPO: &str = "leafpress-dev/leafpress";
pub const GITHUB_API_BASE: &str = "https://api.github.com";
pub const USER_AGENT: &str = "leafpress-launcher";

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    pub assets: Vec<GitHubAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
}

/// Wrap a URL with the GitHub proxy prefix.
/// If proxy is empty, returns the original URL unchanged.
pub fn wrap_with_proxy(proxy: &str, url: &str) -> String {
    if proxy.is_empty() {
        url.to_string()
    } else {
        let base = proxy.trim_end_matches('/');
        format!("{}/{}", base, url)
    }
}

/// Queries the leafpress "latest release" endpoint.
#[derive(Clone)]
pub struct ReleaseFetcher {
    client: Client,
    api_base: String,
    proxy: String,
}

impl ReleaseFetcher {
    pub fn new(client: Client, proxy: impl Into<String>) -> Self {
        Self::with_api_base(client, GITHUB_API_BASE, proxy)
    }

    /// Point the fetcher at a different API host (GitHub Enterprise, test servers).
    pub fn with_api_base(
        client: Client,
        api_base: impl Into<String>,
        proxy: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            proxy: proxy.into(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Build the latest-release API URL, optionally using a GitHub proxy.
    pub fn latest_release_url(&self) -> String {
        let raw = format!(
            "{}/repos/{}/releases/latest",
            self.api_base.trim_end_matches('/'),
            LEAFPRESS_REPO
        );
        wrap_with_proxy(&self.proxy, &raw)
    }

    /// Download URL for an asset, routed through the proxy when one is set.
    pub fn asset_url(&self, asset: &GitHubAsset) -> String {
        wrap_with_proxy(&self.proxy, &asset.browser_download_url)
    }

    pub async fn fetch_latest_release(&self) -> Result<GitHubRelease> {
        let url = self.latest_release_url();
        log::debug!("Fetching latest leafpress release from {}", url);

        let resp = self
            .client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| AppError::release_fetch(format!("Failed to fetch release: {}", e)))?;

        if !resp.status().is_success() {
            return Err(AppError::release_fetch(format!(
                "GitHub API returned status: {}",
                resp.status()
            )));
        }

        resp.json::<GitHubRelease>()
            .await
            .map_err(|e| AppError::release_fetch(format!("Failed to parse release: {}", e)))
    }
}

/// Match an asset name against a `*`-only glob. Matching is case-sensitive and
/// anchored at both ends; every other character is literal.
pub fn match_asset_name(pattern: &str, name: &str) -> bool {
    let expanded = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{expanded}$"))
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Pick the release asset built for the platform pattern.
pub fn select_asset<'a>(release: &'a GitHubRelease, pattern: &str) -> Result<&'a GitHubAsset> {
    release
        .assets
        .iter()
        .find(|asset| match_asset_name(pattern, &asset.name))
        .ok_or_else(|| AppError::asset_not_found(pattern, &release.tag_name))
}

/// Regex for the release tag format, used to sanity-check tags before display.
pub fn is_release_tag(tag: &str) -> bool {
    static TAG_RE: OnceLock<Option<Regex>> = OnceLock::new();
    TAG_RE
        .get_or_init(|| Regex::new(r"^v?\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?$").ok())
        .as_ref()
        .map(|re| re.is_match(tag))
        .unwrap_or(false)
}
