use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use leafpress_launcher_lib::commands::{self, DeployOptions, DeployOutcome, PreviewStatus};
use leafpress_launcher_lib::paths::{default_install_dir, LauncherPaths};
use leafpress_launcher_lib::process::ServerEvent;
use leafpress_launcher_lib::{Launcher, Result};

/// Fetch, run and supervise the leafpress site generator for a note directory
#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    LEAFPRESS_LOG=debug    Enable debug logging")]
struct Cli {
    /// Note directory leafpress builds from (defaults to the current directory)
    #[arg(long = "content-root", global = true)]
    content_root: Option<PathBuf>,

    /// Where launcher settings and the managed binary live
    #[arg(long = "install-dir", global = true)]
    install_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the site once
    Build,
    /// Deploy the site with the configured provider
    Deploy {
        /// Deploy the existing output without rebuilding
        #[arg(long = "skip-build")]
        skip_build: bool,

        /// Ask the provider setup questions again
        #[arg(long)]
        reconfigure: bool,
    },
    /// Run the preview server until Ctrl-C
    Serve,
    /// Stop whatever preview server holds the configured port
    Stop,
    /// Print launcher status as JSON
    Status,
    /// Download the managed binary if it is missing
    Install,
    /// Replace the managed binary with the latest release
    Update,
    /// Compare the installed binary with the latest release
    CheckUpdate,
    /// List source files changed since the last deploy
    Pending,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LEAFPRESS_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            print_json(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let content_root = match cli.content_root {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let install_dir = match cli.install_dir {
        Some(dir) => dir,
        None => default_install_dir()?,
    };
    let launcher = Launcher::activate(LauncherPaths::new(install_dir, content_root))?;

    let code = match cli.command {
        Command::Build => {
            let output = commands::build_site(&launcher).await?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            exit_code(output.success())
        }
        Command::Deploy {
            skip_build,
            reconfigure,
        } => {
            let outcome = commands::deploy_site(
                &launcher,
                DeployOptions {
                    skip_build,
                    reconfigure,
                },
            )
            .await?;
            print_json(&outcome);
            exit_code(matches!(outcome, DeployOutcome::Deployed { .. }))
        }
        Command::Serve => serve(&launcher).await?,
        Command::Stop => {
            let outcome = commands::stop_preview(&launcher).await;
            log::info!("{:?}", outcome);
            ExitCode::SUCCESS
        }
        Command::Status => {
            print_json(&commands::status_snapshot(&launcher).await);
            ExitCode::SUCCESS
        }
        Command::Install => {
            let path = commands::install_binary(&launcher).await?;
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Command::Update => {
            let path = commands::update_binary(&launcher).await?;
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Command::CheckUpdate => {
            print_json(&commands::check_for_update(&launcher).await?);
            ExitCode::SUCCESS
        }
        Command::Pending => {
            print_json(&commands::pending_changes(&launcher)?);
            ExitCode::SUCCESS
        }
    };

    launcher.deactivate().await;
    Ok(code)
}

async fn serve(launcher: &Launcher) -> Result<ExitCode> {
    let mut rx = launcher.supervisor().subscribe_events();
    let (exited_tx, mut exited_rx) = tokio::sync::oneshot::channel::<Option<i32>>();

    tokio::spawn(async move {
        let mut exited_tx = Some(exited_tx);
        loop {
            match rx.recv().await {
                Ok(ServerEvent::Exited { code }) => {
                    log::warn!("Preview server exited unexpectedly (code: {:?})", code);
                    if let Some(tx) = exited_tx.take() {
                        let _ = tx.send(code);
                    }
                }
                Ok(event) => log::debug!("Server event: {:?}", event),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Server event listener lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    match commands::start_preview(launcher).await? {
        PreviewStatus::Ready { url, .. } => log::info!("Preview available at {}", url),
        PreviewStatus::NotReady { port } => {
            log::warn!("Server is running but port {} is not answering yet", port);
        }
        status => {
            log::error!("Preview did not start: {:?}", status);
            return Ok(ExitCode::FAILURE);
        }
    }

    if launcher.config().load().check_updates_on_start
        && !launcher.binary().resolve_path().is_custom()
    {
        report_update(launcher).await;
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                log::error!("Failed to listen for Ctrl-C: {}", e);
            }
            log::info!("Stopping preview");
            commands::stop_preview(launcher).await;
            Ok(ExitCode::SUCCESS)
        }
        _ = &mut exited_rx => Ok(ExitCode::FAILURE),
    }
}

async fn report_update(launcher: &Launcher) {
    match commands::check_for_update(launcher).await {
        Ok(check) if check.update_available => log::info!(
            "leafpress {} is available (installed: {}), run `leafpress-launcher update`",
            check.latest,
            check.current
        ),
        Ok(_) => log::debug!("leafpress is up to date"),
        Err(e) => log::warn!("Update check failed: {}", e),
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => log::error!("Failed to serialize output: {}", e),
    }
}
