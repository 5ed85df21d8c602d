#![cfg(unix)]

use std::fs;
use std::net::TcpListener;
use std::time::Duration;

use leafpress_launcher_lib::commands::{self, PreviewStatus};
use leafpress_launcher_lib::config::BinarySource;
use leafpress_launcher_lib::paths::LauncherPaths;
use leafpress_launcher_lib::platform::resolve_platform;
use leafpress_launcher_lib::process::{ServerState, StartOutcome, StopOutcome};
use leafpress_launcher_lib::Launcher;

/// A launcher whose "binary" is `/bin/sh`, so `serve` runs the script at the content root.
///
/// The returned listener holds the preview port, so the server counts as ready at once.
fn scripted_launcher(temp: &tempfile::TempDir, serve_script: &str) -> (Launcher, TcpListener) {
    let paths = LauncherPaths::new(temp.path().join("install"), temp.path().join("vault"));
    fs::create_dir_all(paths.content_root()).unwrap();
    fs::write(paths.content_root().join("serve"), serve_script).unwrap();

    let platform = resolve_platform("linux", "x86_64").unwrap();
    let launcher = Launcher::activate_with(paths, platform, "http://127.0.0.1:9").unwrap();
    commands::save_binary_source(
        &launcher,
        BinarySource::Custom {
            path: "/bin/sh".to_string(),
        },
    )
    .unwrap();
    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    commands::save_preview_port(&launcher, listener.local_addr().unwrap().port()).unwrap();
    (launcher, listener)
}

async fn spawn_count(log: &std::path::Path) -> usize {
    // Give the script a moment to record its start.
    for _ in 0..20 {
        if log.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    fs::read_to_string(log)
        .map(|text| text.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn rapid_double_start_spawns_one_server() {
    let temp = tempfile::tempdir().unwrap();
    let (launcher, _listener) =
        scripted_launcher(&temp, "echo started >> starts.log\nexec sleep 30\n");
    let supervisor = launcher.supervisor();

    let (first, second) = tokio::join!(supervisor.start(), supervisor.start());
    let outcomes = [first.unwrap(), second.unwrap()];

    let started = outcomes
        .iter()
        .filter(|o| matches!(o, StartOutcome::Started { .. }))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, StartOutcome::AlreadyStarting))
        .count();
    assert_eq!((started, skipped), (1, 1), "outcomes: {outcomes:?}");
    assert_eq!(supervisor.state(), ServerState::Running);

    let log = launcher.paths().content_root().join("starts.log");
    assert_eq!(spawn_count(&log).await, 1);

    launcher.deactivate().await;
    assert_eq!(supervisor.state(), ServerState::Stopped);
    assert!(supervisor.pid().is_none());
}

#[tokio::test]
async fn stop_with_nothing_running_is_a_noop() {
    let temp = tempfile::tempdir().unwrap();
    let (launcher, listener) = scripted_launcher(&temp, "exit 0\n");
    drop(listener);

    assert_eq!(
        commands::stop_preview(&launcher).await,
        StopOutcome::NothingRunning
    );
    assert_eq!(launcher.supervisor().state(), ServerState::Stopped);

    launcher.deactivate().await;
}

#[tokio::test]
async fn status_reflects_running_server() {
    let temp = tempfile::tempdir().unwrap();
    let (launcher, _listener) = scripted_launcher(&temp, "exec sleep 30\n");

    let status = commands::start_preview(&launcher).await.unwrap();
    let PreviewStatus::Ready { url, port } = status else {
        panic!("server did not start: {status:?}");
    };
    assert_eq!(url, commands::preview_url(port));
    let pid = launcher.supervisor().pid().unwrap();

    let snapshot = commands::status_snapshot(&launcher).await;
    assert_eq!(snapshot.server, ServerState::Running);
    assert_eq!(snapshot.pid, Some(pid));
    assert_eq!(snapshot.port, port);
    assert!(snapshot.installed);
    assert!(snapshot.last_deploy.is_none());

    launcher.deactivate().await;
    assert_eq!(launcher.supervisor().state(), ServerState::Stopped);
}
