//! Host-facing actions. Each function maps to one button or menu entry.

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;

use crate::binary::{BinaryLocation, UpdateCheck};
use crate::config::BinarySource;
use crate::deploy::{self, DeployStateRecord, PendingSummary};
use crate::error::{AppError, Result};
use crate::github::USER_AGENT;
use crate::process::{CliOutput, RunStatus, ServerState, StartOutcome, StopOutcome};
use crate::site_config::SiteConfig;
use crate::Launcher;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    pub skip_build: bool,
    pub reconfigure: bool,
}

impl DeployOptions {
    fn args(self) -> Vec<&'static str> {
        let mut args = vec!["deploy"];
        if self.skip_build {
            args.push("--skip-build");
        }
        if self.reconfigure {
            args.push("--reconfigure");
        }
        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeployOutcome {
    /// `url` is read from the deploy record; `None` when it could not be read.
    Deployed { url: Option<String> },
    Failed { exit_code: Option<i32>, stderr: String },
    TimedOut,
    SpawnFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PreviewStatus {
    Ready { url: String, port: u16 },
    /// Another start was already in flight.
    Starting,
    /// Running, but the port did not open within the ready timeout.
    NotReady { port: u16 },
    /// The server died before becoming ready.
    Exited { code: Option<i32> },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastDeployInfo {
    pub summary: String,
    pub url: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub server: ServerState,
    pub port: u16,
    pub pid: Option<u32>,
    pub binary: BinaryLocation,
    pub installed: bool,
    pub installed_version: Option<String>,
    pub last_deploy: Option<LastDeployInfo>,
    /// `None` when the content root could not be scanned.
    pub pending: Option<PendingSummary>,
}

pub fn preview_url(port: u16) -> String {
    format!("http://localhost:{port}")
}

pub async fn build_site(launcher: &Launcher) -> Result<CliOutput> {
    log::info!("Building site");
    let output = launcher.runner().run(["build"]).await?;
    match output.error_message() {
        None => log::info!("Build finished"),
        Some(message) => log::warn!("Build failed: {}", message),
    }
    Ok(output)
}

pub async fn deploy_site(launcher: &Launcher, options: DeployOptions) -> Result<DeployOutcome> {
    log::info!("Deploying site ({:?})", options);
    let output = launcher.runner().run(options.args()).await?;

    let outcome = match output.status {
        RunStatus::Exited(0) => {
            let url = DeployStateRecord::load_last_deploy(&launcher.paths().deploy_state_path())
                .map(|last| last.url)
                .filter(|url| !url.is_empty());
            DeployOutcome::Deployed { url }
        }
        RunStatus::Exited(code) => DeployOutcome::Failed {
            exit_code: Some(code),
            stderr: output.stderr,
        },
        RunStatus::Signaled => DeployOutcome::Failed {
            exit_code: None,
            stderr: output.stderr,
        },
        RunStatus::TimedOut => DeployOutcome::TimedOut,
        RunStatus::SpawnFailed(message) => DeployOutcome::SpawnFailed { message },
    };

    match &outcome {
        DeployOutcome::Deployed { url } => {
            log::info!("Deployed to {}", url.as_deref().unwrap_or("<unknown url>"));
        }
        other => log::warn!("Deploy did not complete: {:?}", other),
    }
    Ok(outcome)
}

/// Start the preview server; resolves once its port accepts connections or the ready timeout passes.
pub async fn start_preview(launcher: &Launcher) -> Result<PreviewStatus> {
    let status = match launcher.supervisor().start().await? {
        StartOutcome::Started { port, .. } => PreviewStatus::Ready {
            url: preview_url(port),
            port,
        },
        StartOutcome::NotReady { port, .. } => PreviewStatus::NotReady { port },
        StartOutcome::Exited { code } => PreviewStatus::Exited { code },
        StartOutcome::AlreadyStarting => PreviewStatus::Starting,
        StartOutcome::Cancelled => PreviewStatus::Cancelled,
    };
    log::info!("Preview status: {:?}", status);
    Ok(status)
}

pub async fn stop_preview(launcher: &Launcher) -> StopOutcome {
    launcher.supervisor().stop().await
}

pub async fn status_snapshot(launcher: &Launcher) -> StatusSnapshot {
    let supervisor = launcher.supervisor();
    let binary = launcher.binary().resolve_path();
    let installed = binary.path().exists();
    let installed_version = if installed {
        launcher
            .binary()
            .installed_version()
            .await
            .map(|version| version.to_string())
    } else {
        None
    };

    let last_deploy =
        DeployStateRecord::load_last_deploy(&launcher.paths().deploy_state_path()).map(|last| {
            LastDeployInfo {
                summary: last.summary(Utc::now()),
                url: last.url,
                timestamp: last.timestamp,
            }
        });

    let pending = match pending_changes(launcher) {
        Ok(summary) => Some(summary),
        Err(e) => {
            log::warn!("Failed to compute pending changes: {}", e);
            None
        }
    };

    StatusSnapshot {
        server: supervisor.state(),
        port: supervisor.port(),
        pid: supervisor.pid(),
        binary,
        installed,
        installed_version,
        last_deploy,
        pending,
    }
}

pub fn pending_changes(launcher: &Launcher) -> Result<PendingSummary> {
    let site = SiteConfig::load(&launcher.paths().site_config_path())?;
    deploy::pending_changes(launcher.paths(), &site)
}

pub async fn install_binary(launcher: &Launcher) -> Result<PathBuf> {
    launcher.binary().ensure_ready().await
}

/// Update the managed binary. A running preview is stopped first so the file can be replaced.
pub async fn update_binary(launcher: &Launcher) -> Result<PathBuf> {
    if launcher.binary().resolve_path().is_custom() {
        return Err(AppError::cannot_update_custom_binary());
    }
    if !matches!(launcher.supervisor().state(), ServerState::Stopped) {
        log::info!("Stopping preview before updating leafpress");
        launcher.supervisor().stop().await;
    }
    launcher.binary().update().await
}

pub async fn check_for_update(launcher: &Launcher) -> Result<UpdateCheck> {
    launcher.binary().check_for_update().await
}

pub fn save_binary_source(launcher: &Launcher, source: BinarySource) -> Result<()> {
    if let BinarySource::Custom { path } = &source {
        if path.trim().is_empty() {
            return Err(AppError::config("Custom binary path must not be empty"));
        }
    }
    launcher.config().with_config_mut(move |config| {
        config.binary = source;
        Ok(())
    })
}

pub fn save_preview_port(launcher: &Launcher, port: u16) -> Result<()> {
    if port == 0 {
        return Err(AppError::config("Preview port must be between 1 and 65535"));
    }
    launcher.config().with_config_mut(move |config| {
        config.preview_port = port;
        Ok(())
    })
}

pub async fn save_github_proxy(launcher: &Launcher, github_proxy: String) -> Result<()> {
    // Test connectivity first
    let url = launcher
        .binary()
        .fetcher_with_proxy(&github_proxy)
        .latest_release_url();
    let resp = launcher
        .client()
        .get(&url)
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/vnd.github.v3+json")
        .send()
        .await
        .map_err(|e| AppError::network_with_url(&url, e.to_string()))?;
    if !resp.status().is_success() {
        return Err(AppError::network_with_url(&url, resp.status().to_string()));
    }

    launcher.config().with_config_mut(move |config| {
        config.github_proxy = github_proxy;
        Ok(())
    })
}

pub fn read_site_config(launcher: &Launcher) -> Result<SiteConfig> {
    SiteConfig::load(&launcher.paths().site_config_path())
}

pub fn write_site_config(launcher: &Launcher, site: &SiteConfig) -> Result<()> {
    site.save(&launcher.paths().site_config_path())
}
