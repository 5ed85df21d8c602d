//! Locating, installing and updating the leafpress executable.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::archive::extract_archive;
use crate::checksum::{verify_checksum, ChecksumStatus};
use crate::config::{BinarySource, ConfigStore};
use crate::download::download_file;
use crate::error::{AppError, Result};
use crate::github::{is_release_tag, select_asset, ReleaseFetcher, GITHUB_API_BASE};
use crate::paths::{expand_home, LauncherPaths};
use crate::platform::Platform;
use crate::validation::resolve_archive_path;
use crate::version::{extract_version, Version};

/// `leafpress --version` should answer almost immediately.
const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// The executable that will be invoked, and who owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "path", rename_all = "snake_case")]
pub enum BinaryLocation {
    /// User-supplied path. Existence-checked only, never downloaded or updated.
    Custom(PathBuf),
    /// `<install-dir>/bin/<executable>`, installed from the release feed.
    Managed(PathBuf),
}

impl BinaryLocation {
    pub fn path(&self) -> &Path {
        match self {
            Self::Custom(path) | Self::Managed(path) => path,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateCheck {
    pub current: String,
    pub latest: String,
    pub latest_tag: String,
    pub update_available: bool,
}

pub struct BinaryManager {
    paths: LauncherPaths,
    platform: Platform,
    config: Arc<ConfigStore>,
    client: Client,
    api_base: String,
    /// Serializes install and update so concurrent callers share one download.
    install_lock: Mutex<()>,
}

impl BinaryManager {
    pub fn new(
        paths: LauncherPaths,
        platform: Platform,
        config: Arc<ConfigStore>,
        client: Client,
    ) -> Self {
        Self::with_api_base(paths, platform, config, client, GITHUB_API_BASE)
    }

    pub fn with_api_base(
        paths: LauncherPaths,
        platform: Platform,
        config: Arc<ConfigStore>,
        client: Client,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            paths,
            platform,
            config,
            client,
            api_base: api_base.into(),
            install_lock: Mutex::new(()),
        }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Release fetcher honouring the currently configured GitHub proxy.
    pub fn fetcher(&self) -> ReleaseFetcher {
        self.fetcher_with_proxy(&self.config.load().github_proxy)
    }

    pub fn fetcher_with_proxy(&self, proxy: &str) -> ReleaseFetcher {
        ReleaseFetcher::with_api_base(self.client.clone(), self.api_base.clone(), proxy)
    }

    pub fn resolve_path(&self) -> BinaryLocation {
        match &self.config.load().binary {
            BinarySource::Custom { path } => BinaryLocation::Custom(expand_home(path)),
            BinarySource::Managed => BinaryLocation::Managed(
                self.paths.bin_dir().join(self.platform.executable_name),
            ),
        }
    }

    /// Make sure the executable exists, installing the managed binary when missing.
    pub async fn ensure_ready(&self) -> Result<PathBuf> {
        match self.resolve_path() {
            BinaryLocation::Custom(path) => {
                if path.exists() {
                    Ok(path)
                } else {
                    Err(AppError::custom_binary_not_found(&path.to_string_lossy()))
                }
            }
            BinaryLocation::Managed(path) => {
                if path.exists() {
                    return Ok(path);
                }

                let _guard = self.install_lock.lock().await;
                // Another caller may have finished the install while we waited.
                if path.exists() {
                    return Ok(path);
                }

                log::info!("leafpress binary not found at {}, installing", path.display());
                self.install_latest().await
            }
        }
    }

    /// Replace the managed binary with the latest release, restoring the old one on failure.
    pub async fn update(&self) -> Result<PathBuf> {
        let BinaryLocation::Managed(exe) = self.resolve_path() else {
            return Err(AppError::cannot_update_custom_binary());
        };

        let _guard = self.install_lock.lock().await;

        let backup = backup_path(&exe);
        let had_binary = exe.exists();
        if had_binary {
            fs::copy(&exe, &backup).map_err(|e| {
                AppError::io(format!("Failed to back up {}: {}", exe.display(), e))
            })?;
        }

        match self.install_latest().await {
            Ok(path) => {
                if had_binary {
                    if let Err(e) = fs::remove_file(&backup) {
                        log::warn!("Failed to remove backup {}: {}", backup.display(), e);
                    }
                }
                log::info!("leafpress binary updated at {}", path.display());
                Ok(path)
            }
            Err(update_err) if had_binary => match fs::rename(&backup, &exe) {
                Ok(()) => {
                    log::warn!("Update failed, previous binary restored: {}", update_err);
                    Err(update_err)
                }
                Err(restore_err) => {
                    log::error!(
                        "Update failed ({}) and restoring {} failed ({}); binary state is unknown",
                        update_err,
                        exe.display(),
                        restore_err
                    );
                    Err(AppError::update_and_restore_failed(
                        &update_err.to_string(),
                        &restore_err.to_string(),
                    ))
                }
            },
            Err(update_err) => Err(update_err),
        }
    }

    /// Version reported by `<exe> --version`, if the binary exists and answers sensibly.
    pub async fn installed_version(&self) -> Option<Version> {
        let location = self.resolve_path();
        let exe = location.path();
        if !exe.exists() {
            return None;
        }

        let mut cmd = Command::new(exe);
        cmd.arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "windows")]
        {
            use windows::Win32::System::Threading::CREATE_NO_WINDOW;
            cmd.creation_flags(CREATE_NO_WINDOW.0);
        }

        let output = match tokio::time::timeout(VERSION_QUERY_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                log::warn!("Failed to run {} --version: {}", exe.display(), e);
                return None;
            }
            Err(_) => {
                log::warn!("{} --version timed out", exe.display());
                return None;
            }
        };

        let text = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        extract_version(&text)
    }

    /// Compare the installed version with the latest release.
    ///
    /// An unreadable installed version counts as `0.0.0`, so an update is always offered.
    pub async fn check_for_update(&self) -> Result<UpdateCheck> {
        let release = self.fetcher().fetch_latest_release().await?;
        let latest = Version::parse(&release.tag_name);
        let current = self.installed_version().await.unwrap_or(Version::ZERO);

        Ok(UpdateCheck {
            update_available: latest > current,
            current: current.to_string(),
            latest: latest.to_string(),
            latest_tag: release.tag_name,
        })
    }

    /// Fetch, select, download, verify and extract the latest release into the bin dir.
    async fn install_latest(&self) -> Result<PathBuf> {
        self.paths.ensure_dirs()?;
        let fetcher = self.fetcher();

        let release = fetcher.fetch_latest_release().await?;
        if !is_release_tag(&release.tag_name) {
            log::warn!("Unexpected release tag format: {}", release.tag_name);
        }
        let asset = select_asset(&release, &self.platform.archive_pattern)?;
        log::info!("Installing leafpress {} ({})", release.tag_name, asset.name);

        let bin_dir = self.paths.bin_dir();
        let archive_path = resolve_archive_path(&bin_dir, &asset.name)?;
        let digest = download_file(fetcher.client(), &fetcher.asset_url(asset), &archive_path).await?;

        let status = match verify_checksum(&fetcher, &release.assets, &asset.name, &digest).await {
            Ok(status) => status,
            Err(e) => {
                remove_archive(&archive_path);
                return Err(e);
            }
        };
        if let ChecksumStatus::Mismatch { expected, actual } = status {
            remove_archive(&archive_path);
            return Err(AppError::checksum_mismatch(&asset.name, &expected, &actual));
        }

        let extracted = extract_archive(&archive_path, &bin_dir, self.platform.executable_name);
        remove_archive(&archive_path);
        extracted
    }
}

fn backup_path(exe: &Path) -> PathBuf {
    let mut name = exe.file_name().unwrap_or_default().to_os_string();
    name.push(".backup");
    exe.with_file_name(name)
}

/// Best-effort removal of a downloaded archive.
fn remove_archive(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            log::warn!("Failed to remove archive {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::build_tar_gz;
    use crate::checksum::sha256_hex;
    use crate::error::ErrorKind;
    use crate::platform::resolve_platform;

    const RELEASE_PATH: &str = "/repos/leafpress-dev/leafpress/releases/latest";
    const ASSET: &str = "leafpress-v1.2.0-linux-amd64.tar.gz";

    struct Fixture {
        _temp: tempfile::TempDir,
        paths: LauncherPaths,
        config: Arc<ConfigStore>,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let paths = LauncherPaths::new(temp.path().join("install"), temp.path().join("notes"));
        let config = Arc::new(ConfigStore::open(paths.config_path()).unwrap());
        Fixture {
            _temp: temp,
            paths,
            config,
        }
    }

    fn manager(fx: &Fixture, api_base: &str) -> BinaryManager {
        BinaryManager::with_api_base(
            fx.paths.clone(),
            resolve_platform("linux", "x86_64").unwrap(),
            Arc::clone(&fx.config),
            Client::new(),
            api_base,
        )
    }

    fn release_json(server_url: &str, with_manifest: bool) -> String {
        let mut assets = vec![serde_json::json!({
            "name": ASSET,
            "browser_download_url": format!("{server_url}/download/{ASSET}"),
            "size": 1,
        })];
        if with_manifest {
            assets.push(serde_json::json!({
                "name": "checksums.txt",
                "browser_download_url": format!("{server_url}/download/checksums.txt"),
                "size": 1,
            }));
        }
        serde_json::json!({ "tag_name": "v1.2.0", "assets": assets }).to_string()
    }

    fn archive_bytes(fx: &Fixture, body: &str) -> Vec<u8> {
        let path = fx.paths.install_dir().with_file_name("fixture.tar.gz");
        build_tar_gz(&path, &[("leafpress", body)]);
        fs::read(path).unwrap()
    }

    #[test]
    fn custom_path_expands_home() {
        let fx = fixture();
        fx.config
            .with_config_mut(|c| {
                c.binary = BinarySource::Custom {
                    path: "~/tools/leafpress".into(),
                };
                Ok(())
            })
            .unwrap();
        let mgr = manager(&fx, "http://127.0.0.1:9");
        let location = mgr.resolve_path();
        assert!(location.is_custom());
        if let Some(home) = dirs::home_dir() {
            assert_eq!(location.path(), home.join("tools/leafpress"));
        }
    }

    #[test]
    fn managed_path_is_under_bin_dir() {
        let fx = fixture();
        let mgr = manager(&fx, "http://127.0.0.1:9");
        assert_eq!(
            mgr.resolve_path(),
            BinaryLocation::Managed(fx.paths.bin_dir().join("leafpress"))
        );
    }

    #[tokio::test]
    async fn missing_custom_binary_is_fatal() {
        let fx = fixture();
        fx.config
            .with_config_mut(|c| {
                c.binary = BinarySource::Custom {
                    path: "/definitely/not/here/leafpress".into(),
                };
                Ok(())
            })
            .unwrap();
        let mgr = manager(&fx, "http://127.0.0.1:9");

        let err = mgr.ensure_ready().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CustomBinaryNotFound);

        let err = mgr.update().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CannotUpdateCustomBinary);
    }

    #[tokio::test]
    async fn checksum_mismatch_discards_archive() {
        let fx = fixture();
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let bytes = archive_bytes(&fx, "binary");

        let _release = server
            .mock("GET", RELEASE_PATH)
            .with_body(release_json(&url, true))
            .create_async()
            .await;
        let _asset = server
            .mock("GET", format!("/download/{ASSET}").as_str())
            .with_body(bytes)
            .create_async()
            .await;
        let _manifest = server
            .mock("GET", "/download/checksums.txt")
            .with_body(format!("{}  {ASSET}\n", "0".repeat(64)))
            .create_async()
            .await;

        let mgr = manager(&fx, &url);
        let err = mgr.ensure_ready().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert!(!fx.paths.bin_dir().join(ASSET).exists());
        assert!(!fx.paths.bin_dir().join("leafpress").exists());
    }

    #[tokio::test]
    async fn verified_install_then_noop() {
        let fx = fixture();
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let bytes = archive_bytes(&fx, "binary");
        let digest = sha256_hex(&bytes);

        let release = server
            .mock("GET", RELEASE_PATH)
            .with_body(release_json(&url, true))
            .expect(1)
            .create_async()
            .await;
        let _asset = server
            .mock("GET", format!("/download/{ASSET}").as_str())
            .with_body(bytes)
            .create_async()
            .await;
        let _manifest = server
            .mock("GET", "/download/checksums.txt")
            .with_body(format!("{digest}  {ASSET}\n"))
            .create_async()
            .await;

        let mgr = manager(&fx, &url);
        let exe = mgr.ensure_ready().await.unwrap();
        assert_eq!(fs::read_to_string(&exe).unwrap(), "binary");
        assert!(!fx.paths.bin_dir().join(ASSET).exists());

        // Second call finds the binary and never touches the network.
        mgr.ensure_ready().await.unwrap();
        release.assert_async().await;
    }

    #[tokio::test]
    async fn failed_update_restores_previous_binary() {
        let fx = fixture();
        let mut server = mockito::Server::new_async().await;
        let _release = server
            .mock("GET", RELEASE_PATH)
            .with_status(500)
            .create_async()
            .await;

        fs::create_dir_all(fx.paths.bin_dir()).unwrap();
        let exe = fx.paths.bin_dir().join("leafpress");
        fs::write(&exe, "old").unwrap();

        let mgr = manager(&fx, &server.url());
        let err = mgr.update().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ReleaseFetch);
        assert_eq!(fs::read_to_string(&exe).unwrap(), "old");
        assert!(!backup_path(&exe).exists());
    }

    #[tokio::test]
    async fn update_replaces_binary_and_drops_backup() {
        let fx = fixture();
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let bytes = archive_bytes(&fx, "new");
        let digest = sha256_hex(&bytes);

        let _release = server
            .mock("GET", RELEASE_PATH)
            .with_body(release_json(&url, true))
            .create_async()
            .await;
        let _asset = server
            .mock("GET", format!("/download/{ASSET}").as_str())
            .with_body(bytes)
            .create_async()
            .await;
        let _manifest = server
            .mock("GET", "/download/checksums.txt")
            .with_body(format!("{digest}  {ASSET}\n"))
            .create_async()
            .await;

        fs::create_dir_all(fx.paths.bin_dir()).unwrap();
        let exe = fx.paths.bin_dir().join("leafpress");
        fs::write(&exe, "old").unwrap();

        let mgr = manager(&fx, &url);
        let updated = mgr.update().await.unwrap();

        assert_eq!(updated, exe);
        assert_eq!(fs::read_to_string(&exe).unwrap(), "new");
        assert!(!backup_path(&exe).exists());
        assert!(!fx.paths.bin_dir().join(ASSET).exists());
    }

    #[tokio::test]
    async fn lost_backup_reports_update_and_restore_failure() {
        let fx = fixture();
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        fs::create_dir_all(fx.paths.bin_dir()).unwrap();
        let exe = fx.paths.bin_dir().join("leafpress");
        fs::write(&exe, "old").unwrap();
        let backup = backup_path(&exe);

        let _release = server
            .mock("GET", RELEASE_PATH)
            .with_body(release_json(&url, false))
            .create_async()
            .await;
        // The download fails after the backup has vanished, so nothing can be restored.
        let _asset = server
            .mock("GET", format!("/download/{ASSET}").as_str())
            .with_status(500)
            .with_body_from_request(move |_| {
                let _ = fs::remove_file(&backup);
                Vec::new()
            })
            .create_async()
            .await;

        let mgr = manager(&fx, &url);
        let err = mgr.update().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UpdateAndRestoreFailed);
        assert!(err.payload().contains_key("update_error"));
        assert!(err.payload().contains_key("restore_error"));
    }

    #[tokio::test]
    async fn unreadable_version_always_offers_update() {
        let fx = fixture();
        let mut server = mockito::Server::new_async().await;
        let url = server.url();
        let _release = server
            .mock("GET", RELEASE_PATH)
            .with_body(release_json(&url, false))
            .create_async()
            .await;

        let mgr = manager(&fx, &url);
        let check = mgr.check_for_update().await.unwrap();

        assert_eq!(check.current, "0.0.0");
        assert_eq!(check.latest, "1.2.0");
        assert!(check.update_available);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reads_self_reported_version() {
        use std::os::unix::fs::PermissionsExt as _;

        let fx = fixture();
        fs::create_dir_all(fx.paths.bin_dir()).unwrap();
        let exe = fx.paths.bin_dir().join("leafpress");
        fs::write(&exe, "#!/bin/sh\necho \"leafpress version v0.9.1-beta.2\"\n").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();

        let mgr = manager(&fx, "http://127.0.0.1:9");
        let version = mgr.installed_version().await.unwrap();
        assert_eq!(version.to_string(), "0.9.1-beta.2");
    }
}
