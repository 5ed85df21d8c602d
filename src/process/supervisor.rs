//! Supervision of the long-running `leafpress serve` process.
//!
//! At most one server handle is tracked at a time. A start holds the
//! `Starting` state until the preview port opens (or the ready timeout
//! passes), so repeated triggers in that window are no-ops. Starting while a
//! handle exists stops it and waits for the port to be released first.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, watch};

use super::control::{force_kill, graceful_signal, terminate_pid};
use super::poll::{PollOutcome, PollSet, PollTask};
use super::port::{is_port_open, pids_on_port};
use super::{KILL_GRACE, POLL_INTERVAL};
use crate::binary::BinaryManager;
use crate::config::ConfigStore;
use crate::error::{AppError, Result};

pub const READY_TIMEOUT: Duration = Duration::from_secs(10);
pub const STOPPED_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Started { pid: u32, port: u16 },
    Stopped,
    /// The server died without being asked to.
    Exited { code: Option<i32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Spawned and the preview port accepts connections.
    Started { pid: u32, port: u16 },
    /// Spawned and tracked, but the port did not open within the ready timeout.
    NotReady { pid: u32, port: u16 },
    /// Another start is in flight; nothing was spawned.
    AlreadyStarting,
    /// `stop()` or shutdown ran while this start was in flight.
    Cancelled,
    /// The server exited before it became ready.
    Exited { code: Option<i32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { pid: u32 },
    /// No handle was tracked; whatever listened on the port was terminated.
    StoppedByPort { pids: Vec<u32> },
    NothingRunning,
}

/// `None` while the process runs, then its exit code (itself `None` when killed by a signal).
type ExitState = Option<Option<i32>>;

struct ServerHandle {
    pid: u32,
    port: u16,
    generation: u64,
    exited: watch::Receiver<ExitState>,
}

impl ServerHandle {
    fn exit_state(&self) -> ExitState {
        *self.exited.borrow()
    }
}

enum Slot {
    Stopped,
    /// The handle is `None` until the process has been spawned.
    Starting(Option<ServerHandle>),
    Running(ServerHandle),
    Stopping,
}

struct Inner {
    slot: Slot,
    generation: u64,
    /// Generation and exit code of the last server that died on its own.
    last_exit: Option<(u64, Option<i32>)>,
}

pub struct ServerSupervisor {
    binary: Arc<BinaryManager>,
    config: Arc<ConfigStore>,
    cwd: PathBuf,
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<ServerEvent>,
    polls: PollSet,
    ready_timeout: Duration,
    stop_grace: Duration,
}

impl ServerSupervisor {
    pub fn new(binary: Arc<BinaryManager>, config: Arc<ConfigStore>, cwd: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            binary,
            config,
            cwd: cwd.into(),
            inner: Arc::new(Mutex::new(Inner {
                slot: Slot::Stopped,
                generation: 0,
                last_exit: None,
            })),
            events,
            polls: PollSet::new(POLL_INTERVAL),
            ready_timeout: READY_TIMEOUT,
            stop_grace: KILL_GRACE,
        }
    }

    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ServerState {
        match self.lock().slot {
            Slot::Stopped => ServerState::Stopped,
            Slot::Starting(_) => ServerState::Starting,
            Slot::Running(_) => ServerState::Running,
            Slot::Stopping => ServerState::Stopping,
        }
    }

    /// PID of the tracked server, including one that is still starting.
    pub fn pid(&self) -> Option<u32> {
        match &self.lock().slot {
            Slot::Running(handle) | Slot::Starting(Some(handle)) => Some(handle.pid),
            _ => None,
        }
    }

    /// Port of the tracked server, or the configured preview port.
    pub fn port(&self) -> u16 {
        match &self.lock().slot {
            Slot::Running(handle) | Slot::Starting(Some(handle)) => handle.port,
            _ => self.config.load().preview_port,
        }
    }

    /// Launch `leafpress serve` and wait until its port opens or the ready timeout passes.
    ///
    /// The supervisor stays `Starting` for that whole window, so a second call
    /// made meanwhile returns [`StartOutcome::AlreadyStarting`].
    pub async fn start(&self) -> Result<StartOutcome> {
        // Claim the Starting state before the first await so rapid repeats are no-ops.
        let (previous, was_stopping) = {
            let mut inner = self.lock();
            match std::mem::replace(&mut inner.slot, Slot::Starting(None)) {
                slot @ Slot::Starting(_) => {
                    inner.slot = slot;
                    log::info!("leafpress serve is already starting");
                    return Ok(StartOutcome::AlreadyStarting);
                }
                Slot::Running(handle) => (Some(handle), false),
                Slot::Stopping => (None, true),
                Slot::Stopped => (None, false),
            }
        };

        if let Some(handle) = previous {
            log::info!("Replacing running leafpress serve (pid {})", handle.pid);
            self.terminate_handle(&handle).await;
            let _ = self.events.send(ServerEvent::Stopped);
            self.wait_for_port_release(handle.port).await;
        } else if was_stopping {
            self.wait_for_port_release(self.config.load().preview_port)
                .await;
        }

        let handle = match self.spawn_serve().await {
            Ok(handle) => handle,
            Err(e) => {
                let mut inner = self.lock();
                if matches!(inner.slot, Slot::Starting(None)) {
                    inner.slot = Slot::Stopped;
                }
                return Err(e);
            }
        };
        let (pid, port, generation) = (handle.pid, handle.port, handle.generation);
        let exited = handle.exited.clone();

        let cancelled = {
            let mut inner = self.lock();
            if matches!(inner.slot, Slot::Starting(None)) {
                inner.slot = Slot::Starting(Some(handle));
                None
            } else {
                Some(handle)
            }
        };
        if let Some(handle) = cancelled {
            log::info!("Start cancelled by stop, terminating pid {}", pid);
            self.terminate_handle(&handle).await;
            return Ok(StartOutcome::Cancelled);
        }
        log::info!("leafpress serve spawned (pid: {}, port: {})", pid, port);

        let ready = self
            .polls
            .wait_until(
                move || {
                    let gone = exited.borrow().is_some();
                    async move { gone || is_port_open(port).await }
                },
                self.ready_timeout,
            )
            .await;

        Ok(self.finish_start(generation, ready))
    }

    /// Move a start that is still ours from `Starting` to `Running`, or report what ended it.
    fn finish_start(&self, generation: u64, ready: PollOutcome) -> StartOutcome {
        let mut inner = self.lock();
        let handle = match std::mem::replace(&mut inner.slot, Slot::Stopped) {
            Slot::Starting(Some(handle)) if handle.generation == generation => handle,
            other => {
                inner.slot = other;
                return match inner.last_exit {
                    Some((exited_generation, code)) if exited_generation == generation => {
                        StartOutcome::Exited { code }
                    }
                    _ => StartOutcome::Cancelled,
                };
            }
        };

        // Exited, but the exit watcher has not cleared the slot yet.
        if let Some(code) = handle.exit_state() {
            inner.last_exit = Some((generation, code));
            drop(inner);
            log::warn!("leafpress serve exited before becoming ready (code {:?})", code);
            let _ = self.events.send(ServerEvent::Exited { code });
            return StartOutcome::Exited { code };
        }

        let (pid, port) = (handle.pid, handle.port);
        inner.slot = Slot::Running(handle);
        drop(inner);

        let _ = self.events.send(ServerEvent::Started { pid, port });
        match ready {
            PollOutcome::Satisfied => {
                log::info!("leafpress serve ready (pid: {}, port: {})", pid, port);
                StartOutcome::Started { pid, port }
            }
            PollOutcome::TimedOut | PollOutcome::Cancelled => {
                log::warn!(
                    "leafpress serve (pid {}) did not open port {} within {}s",
                    pid,
                    port,
                    self.ready_timeout.as_secs()
                );
                StartOutcome::NotReady { pid, port }
            }
        }
    }

    /// Stop the tracked server, or whatever holds the preview port when none is tracked.
    pub async fn stop(&self) -> StopOutcome {
        let (handle, port) = {
            let mut inner = self.lock();
            match std::mem::replace(&mut inner.slot, Slot::Stopping) {
                Slot::Running(handle) | Slot::Starting(Some(handle)) => {
                    let port = handle.port;
                    (Some(handle), port)
                }
                Slot::Stopping => return StopOutcome::NothingRunning,
                Slot::Starting(None) | Slot::Stopped => (None, self.config.load().preview_port),
            }
        };

        let outcome = match handle {
            Some(handle) => {
                log::info!("Stopping leafpress serve (pid: {}, port: {})", handle.pid, port);
                self.terminate_handle(&handle).await;
                StopOutcome::Stopped { pid: handle.pid }
            }
            None => self.stop_by_port(port).await,
        };

        {
            let mut inner = self.lock();
            if matches!(inner.slot, Slot::Stopping) {
                inner.slot = Slot::Stopped;
            }
        }

        if outcome != StopOutcome::NothingRunning {
            let _ = self.events.send(ServerEvent::Stopped);
        }
        outcome
    }

    /// Poll until the preview port accepts connections.
    pub fn wait_for_server_ready(&self) -> PollTask {
        let port = self.port();
        self.polls
            .wait_until(move || is_port_open(port), self.ready_timeout)
    }

    /// Poll until the preview port is free.
    pub fn wait_for_server_stopped(&self) -> PollTask {
        self.wait_for_port_free(self.port(), STOPPED_TIMEOUT)
    }

    /// Cancel outstanding polls and stop a server this supervisor is tracking.
    pub async fn shutdown(&self) {
        self.polls.cancel_all();
        if matches!(self.state(), ServerState::Running | ServerState::Starting) {
            self.stop().await;
        }
    }

    fn wait_for_port_free(&self, port: u16, timeout: Duration) -> PollTask {
        self.polls
            .wait_until(move || async move { !is_port_open(port).await }, timeout)
    }

    async fn wait_for_port_release(&self, port: u16) {
        if self.wait_for_port_free(port, STOPPED_TIMEOUT).await != PollOutcome::Satisfied {
            log::warn!("Port {} is still in use, starting anyway", port);
        }
    }

    async fn stop_by_port(&self, port: u16) -> StopOutcome {
        let own_pid = std::process::id();
        let pids: Vec<u32> = pids_on_port(port)
            .await
            .into_iter()
            .filter(|pid| *pid != own_pid)
            .collect();

        if pids.is_empty() {
            log::debug!("Nothing listening on port {}, nothing to stop", port);
            return StopOutcome::NothingRunning;
        }

        for &pid in &pids {
            log::warn!(
                "No tracked preview server, stopping PID {} listening on port {}",
                pid,
                port
            );
            terminate_pid(pid, self.stop_grace).await;
        }
        StopOutcome::StoppedByPort { pids }
    }

    async fn terminate_handle(&self, handle: &ServerHandle) {
        let mut exited = handle.exited.clone();
        if handle.exit_state().is_some() {
            return;
        }

        match graceful_signal(handle.pid) {
            Ok(()) => {
                if tokio::time::timeout(self.stop_grace, exited.wait_for(Option::is_some))
                    .await
                    .is_ok()
                {
                    return;
                }
                log::warn!(
                    "leafpress serve (pid {}) did not stop within {}s, killing",
                    handle.pid,
                    self.stop_grace.as_secs()
                );
            }
            Err(e) => log::warn!("{}, killing", e),
        }

        if let Err(e) = force_kill(handle.pid) {
            log::error!("Failed to kill leafpress serve: {}", e);
        }
        if tokio::time::timeout(self.stop_grace, exited.wait_for(Option::is_some))
            .await
            .is_err()
        {
            log::error!("leafpress serve (pid {}) is still running", handle.pid);
        }
    }

    async fn spawn_serve(&self) -> Result<ServerHandle> {
        let exe = self.binary.ensure_ready().await?;
        let port = self.config.load().preview_port;

        let mut cmd = Command::new(&exe);
        cmd.arg("serve")
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(target_os = "windows")]
        {
            use windows::Win32::System::Threading::CREATE_NO_WINDOW;
            cmd.creation_flags(CREATE_NO_WINDOW.0);
        }

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::process(format!("Failed to start leafpress serve: {}", e)))?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::process("Failed to get process ID"))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, "stderr"));
        }

        let generation = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.generation
        };

        let (exit_tx, exited) = watch::channel::<ExitState>(None);
        let inner = Arc::clone(&self.inner);
        let events = self.events.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    log::warn!("Failed to wait for leafpress serve: {}", e);
                    None
                }
            };
            let _ = exit_tx.send(Some(code));
            handle_serve_exit(&inner, &events, generation, code);
        });

        Ok(ServerHandle {
            pid,
            port,
            generation,
            exited,
        })
    }
}

/// Clear the tracked handle if the exiting process is still the one being tracked.
fn handle_serve_exit(
    inner: &Mutex<Inner>,
    events: &broadcast::Sender<ServerEvent>,
    generation: u64,
    code: Option<i32>,
) {
    let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
    let tracked = matches!(
        &inner.slot,
        Slot::Running(handle) | Slot::Starting(Some(handle)) if handle.generation == generation
    );
    if !tracked {
        log::debug!("leafpress serve exited after stop (code {:?})", code);
        return;
    }
    inner.slot = Slot::Stopped;
    inner.last_exit = Some((generation, code));
    drop(inner);

    log::warn!("leafpress serve exited unexpectedly (code {:?})", code);
    let _ = events.send(ServerEvent::Exited { code });
}

async fn forward_lines<R>(pipe: R, label: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if label == "stderr" {
            log::warn!("[leafpress serve {}] {}", label, line);
        } else {
            log::info!("[leafpress serve {}] {}", label, line);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::BinarySource;
    use crate::paths::LauncherPaths;
    use crate::platform::resolve_platform;
    use crate::process::control::is_process_alive;

    fn free_port() -> u16 {
        std::net::TcpListener::bind(("127.0.0.1", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    /// A bound socket standing in for a server that is ready at once.
    fn listening() -> (std::net::TcpListener, u16) {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// `/bin/sh serve` runs the `serve` script in the content root.
    fn supervisor(temp: &tempfile::TempDir, script: &str, port: u16) -> ServerSupervisor {
        std::fs::write(temp.path().join("serve"), script).unwrap();

        let paths = LauncherPaths::new(temp.path().join(".launcher"), temp.path());
        let config = Arc::new(ConfigStore::open(paths.config_path()).unwrap());
        config
            .with_config_mut(|c| {
                c.binary = BinarySource::Custom {
                    path: "/bin/sh".into(),
                };
                c.preview_port = port;
                Ok(())
            })
            .unwrap();

        let binary = Arc::new(BinaryManager::new(
            paths,
            resolve_platform("linux", "x86_64").unwrap(),
            Arc::clone(&config),
            reqwest::Client::new(),
        ));
        ServerSupervisor::new(binary, config, temp.path())
    }

    #[tokio::test]
    async fn double_start_with_installed_binary_spawns_once() {
        let temp = tempfile::tempdir().unwrap();
        let (_listener, port) = listening();
        let sup = supervisor(&temp, "echo started >> starts.log\nexec sleep 30\n", port);

        let (first, second) = tokio::join!(sup.start(), sup.start());
        let mut outcomes = [first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, StartOutcome::AlreadyStarting));
        let [StartOutcome::Started { pid, port: started_port }, StartOutcome::AlreadyStarting] =
            outcomes
        else {
            panic!("unexpected outcomes: {outcomes:?}");
        };
        assert_eq!(started_port, port);
        assert_eq!(sup.state(), ServerState::Running);
        assert_eq!(sup.pid(), Some(pid));
        assert_eq!(sup.wait_for_server_ready().await, PollOutcome::Satisfied);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let log = std::fs::read_to_string(temp.path().join("starts.log")).unwrap();
        assert_eq!(log.lines().count(), 1);

        assert_eq!(sup.stop().await, StopOutcome::Stopped { pid });
    }

    #[tokio::test]
    async fn start_holds_starting_until_ready_timeout() {
        let temp = tempfile::tempdir().unwrap();
        let sup = supervisor(&temp, "exec sleep 30\n", free_port())
            .with_ready_timeout(Duration::from_millis(600));

        let observer = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            (sup.state(), sup.start().await.unwrap())
        };
        let (outcome, (state, repeat)) = tokio::join!(sup.start(), observer);

        assert_eq!(state, ServerState::Starting);
        assert_eq!(repeat, StartOutcome::AlreadyStarting);
        let StartOutcome::NotReady { pid, .. } = outcome.unwrap() else {
            panic!("closed port should report not ready");
        };
        assert_eq!(sup.state(), ServerState::Running);
        assert_eq!(sup.stop().await, StopOutcome::Stopped { pid });
    }

    #[tokio::test]
    async fn replacing_start_stops_previous_process() {
        let temp = tempfile::tempdir().unwrap();
        let sup = supervisor(&temp, "exec sleep 30\n", free_port())
            .with_ready_timeout(Duration::from_millis(300));

        let StartOutcome::NotReady { pid: first, .. } = sup.start().await.unwrap() else {
            panic!("first start did not spawn");
        };
        let StartOutcome::NotReady { pid: second, .. } = sup.start().await.unwrap() else {
            panic!("second start did not spawn");
        };

        assert_ne!(first, second);
        assert!(!is_process_alive(first));
        assert_eq!(sup.pid(), Some(second));

        assert_eq!(sup.stop().await, StopOutcome::Stopped { pid: second });
        assert_eq!(sup.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn exit_before_ready_is_reported_by_start() {
        let temp = tempfile::tempdir().unwrap();
        let sup = supervisor(&temp, "exit 3\n", free_port());

        let outcome = tokio::time::timeout(Duration::from_secs(5), sup.start())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, StartOutcome::Exited { code: Some(3) });
        assert_eq!(sup.state(), ServerState::Stopped);
        assert_eq!(sup.pid(), None);
    }

    #[tokio::test]
    async fn stop_during_start_cancels_it() {
        let temp = tempfile::tempdir().unwrap();
        let sup = supervisor(&temp, "exec sleep 30\n", free_port());

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            sup.stop().await
        };
        let (outcome, _) = tokio::join!(sup.start(), stopper);

        assert_eq!(outcome.unwrap(), StartOutcome::Cancelled);
        assert_eq!(sup.state(), ServerState::Stopped);
        assert_eq!(sup.pid(), None);
    }

    #[tokio::test]
    async fn unexpected_exit_clears_handle() {
        let temp = tempfile::tempdir().unwrap();
        let (_listener, port) = listening();
        let sup = supervisor(&temp, "sleep 0.5\nexit 7\n", port);
        let mut events = sup.subscribe_events();

        assert!(matches!(
            sup.start().await.unwrap(),
            StartOutcome::Started { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            ServerEvent::Started { .. }
        ));

        let exited = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exited, ServerEvent::Exited { code: Some(7) });
        assert_eq!(sup.state(), ServerState::Stopped);
        assert_eq!(sup.pid(), None);
    }

    #[tokio::test]
    async fn stop_without_handle_on_free_port_is_noop() {
        let temp = tempfile::tempdir().unwrap();
        let sup = supervisor(&temp, "exit 0\n", free_port());

        assert_eq!(sup.stop().await, StopOutcome::NothingRunning);
        assert_eq!(sup.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_cancels_polls_and_stops_server() {
        let temp = tempfile::tempdir().unwrap();
        let (_listener, port) = listening();
        let sup = supervisor(&temp, "exec sleep 30\n", port);
        let StartOutcome::Started { pid, .. } = sup.start().await.unwrap() else {
            panic!("server did not start");
        };

        // The listener keeps the port busy, so this poll would run for the full stop timeout.
        let stopped = sup.wait_for_server_stopped();
        sup.shutdown().await;

        assert_eq!(stopped.await, PollOutcome::Cancelled);
        assert_eq!(sup.state(), ServerState::Stopped);
        assert!(!is_process_alive(pid));
    }
}
