pub mod archive;
pub mod binary;
pub mod checksum;
pub mod commands;
pub mod config;
pub mod deploy;
pub mod download;
mod error;
pub mod github;
pub mod paths;
pub mod platform;
pub mod process;
pub mod site_config;
pub mod validation;
pub mod version;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use binary::BinaryManager;
use config::ConfigStore;
pub use error::{AppError, ErrorKind, Result};
use github::GITHUB_API_BASE;
use paths::LauncherPaths;
use platform::Platform;
use process::{ProcessRunner, ServerSupervisor};

/// Timeout for every HTTP request made by the launcher.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// One launcher context: created on activation, torn down with [`Launcher::deactivate`].
///
/// Owns the only [`ServerSupervisor`], so every start/stop goes through it.
pub struct Launcher {
    paths: LauncherPaths,
    config: Arc<ConfigStore>,
    client: Client,
    binary: Arc<BinaryManager>,
    runner: ProcessRunner,
    supervisor: ServerSupervisor,
}

impl Launcher {
    pub fn activate(paths: LauncherPaths) -> Result<Self> {
        Self::activate_with(paths, Platform::current()?, GITHUB_API_BASE)
    }

    /// Activate against an explicit platform and release API (mirrors, tests).
    pub fn activate_with(
        paths: LauncherPaths,
        platform: Platform,
        api_base: impl Into<String>,
    ) -> Result<Self> {
        paths.ensure_dirs()?;
        let config = Arc::new(ConfigStore::open(paths.config_path())?);
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;

        let binary = Arc::new(BinaryManager::with_api_base(
            paths.clone(),
            platform,
            Arc::clone(&config),
            client.clone(),
            api_base,
        ));
        let runner = ProcessRunner::new(Arc::clone(&binary), paths.content_root());
        let supervisor = ServerSupervisor::new(
            Arc::clone(&binary),
            Arc::clone(&config),
            paths.content_root(),
        );

        log::info!(
            "Launcher activated (content root: {}, install dir: {})",
            paths.content_root().display(),
            paths.install_dir().display()
        );

        Ok(Self {
            paths,
            config,
            client,
            binary,
            runner,
            supervisor,
        })
    }

    pub fn paths(&self) -> &LauncherPaths {
        &self.paths
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn binary(&self) -> &BinaryManager {
        &self.binary
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    pub fn supervisor(&self) -> &ServerSupervisor {
        &self.supervisor
    }

    /// Cancel outstanding polls and stop the preview server this context started.
    pub async fn deactivate(&self) {
        log::info!("Launcher deactivating");
        self.supervisor.shutdown().await;
    }
}
