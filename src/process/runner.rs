//! Bounded `leafpress` invocations (`build`, `deploy`, ...).

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::control::{force_kill, graceful_signal};
use super::KILL_GRACE;
use crate::binary::BinaryManager;
use crate::error::Result;

/// Wall-clock limit for one bounded command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RunStatus {
    Exited(i32),
    /// Terminated by a signal without an exit code.
    Signaled,
    TimedOut,
    /// The OS refused to start the process.
    SpawnFailed(String),
}

/// Captured result of one invocation. Never mutated after it is returned.
#[derive(Debug, Clone, Serialize)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: RunStatus,
}

impl CliOutput {
    fn spawn_failed(message: String) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            status: RunStatus::SpawnFailed(message),
        }
    }

    pub fn success(&self) -> bool {
        self.status == RunStatus::Exited(0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            RunStatus::Exited(code) => Some(code),
            _ => None,
        }
    }

    /// Human-readable failure reason, `None` on success.
    pub fn error_message(&self) -> Option<String> {
        match &self.status {
            RunStatus::Exited(0) => None,
            RunStatus::Exited(code) => Some(match self.stderr.trim() {
                "" => format!("leafpress exited with code {code}"),
                stderr => stderr.to_string(),
            }),
            RunStatus::Signaled => Some("leafpress was terminated by a signal".to_string()),
            RunStatus::TimedOut => Some("leafpress timed out".to_string()),
            RunStatus::SpawnFailed(message) => Some(message.clone()),
        }
    }
}

pub struct ProcessRunner {
    binary: Arc<BinaryManager>,
    cwd: PathBuf,
    timeout: Duration,
    kill_grace: Duration,
}

impl ProcessRunner {
    pub fn new(binary: Arc<BinaryManager>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            binary,
            cwd: cwd.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            kill_grace: KILL_GRACE,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    /// Ensure the binary is ready, then run it with `args`.
    ///
    /// Binary resolution failures are errors; everything that happens to the
    /// process itself is reported through [`CliOutput::status`].
    pub async fn run<I, S>(&self, args: I) -> Result<CliOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let exe = self.binary.ensure_ready().await?;
        Ok(self.run_executable(&exe, args).await)
    }

    pub async fn run_executable<I, S>(&self, exe: &Path, args: I) -> CliOutput
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(exe);
        cmd.args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "windows")]
        {
            use windows::Win32::System::Threading::CREATE_NO_WINDOW;
            cmd.creation_flags(CREATE_NO_WINDOW.0);
        }

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::error!("Failed to spawn {}: {}", exe.display(), e);
                return CliOutput::spawn_failed(format!("Failed to start {}: {}", exe.display(), e));
            }
        };

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let readers = [
            child
                .stdout
                .take()
                .map(|pipe| spawn_collector(pipe, "stdout", Arc::clone(&stdout_buf))),
            child
                .stderr
                .take()
                .map(|pipe| spawn_collector(pipe, "stderr", Arc::clone(&stderr_buf))),
        ];

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => match status.code() {
                Some(code) => RunStatus::Exited(code),
                None => RunStatus::Signaled,
            },
            Ok(Err(e)) => RunStatus::SpawnFailed(format!("Failed to wait for leafpress: {e}")),
            Err(_) => {
                log::warn!(
                    "leafpress timed out after {}s, terminating",
                    self.timeout.as_secs()
                );
                self.terminate(&mut child).await;
                RunStatus::TimedOut
            }
        };

        // Grandchildren may keep a pipe open; do not wait on them forever.
        for reader in readers.into_iter().flatten() {
            let abort = reader.abort_handle();
            if tokio::time::timeout(self.kill_grace, reader).await.is_err() {
                log::debug!("Output pipe still open after exit, abandoning reader");
                abort.abort();
            }
        }

        CliOutput {
            stdout: take_buffer(&stdout_buf),
            stderr: take_buffer(&stderr_buf),
            status,
        }
    }

    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            if let Err(e) = graceful_signal(pid) {
                log::warn!("{}", e);
            }
        }

        if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
            return;
        }

        log::warn!(
            "leafpress ignored termination for {}s, killing",
            self.kill_grace.as_secs()
        );
        let killed = match child.id() {
            Some(pid) => force_kill(pid),
            None => Ok(()),
        };
        if let Err(e) = killed {
            log::error!("{}", e);
            let _ = child.start_kill();
        }
        let _ = child.wait().await;
    }
}

fn spawn_collector<R>(pipe: R, label: &'static str, buffer: Arc<Mutex<String>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    log::debug!("[leafpress {}] {}", label, text.trim_end());
                    buffer
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push_str(&text);
                }
                Err(e) => {
                    log::warn!("Failed to read leafpress {}: {}", label, e);
                    break;
                }
            }
        }
    })
}

fn take_buffer(buffer: &Mutex<String>) -> String {
    std::mem::take(&mut *buffer.lock().unwrap_or_else(|e| e.into_inner()))
}
