//! Platform-agnostic process control functions.

use std::time::Duration;

use crate::error::{AppError, Result};

/// Check if a process is alive by PID.
#[cfg(target_os = "windows")]
pub fn is_process_alive(pid: u32) -> bool {
    super::win_api::is_process_alive(pid)
}

/// Check if a process is alive by PID.
#[cfg(not(target_os = "windows"))]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Ask the process tree to exit (`taskkill` without `/F`).
#[cfg(target_os = "windows")]
pub fn graceful_signal(pid: u32) -> Result<()> {
    run_taskkill(pid, false)
}

/// Send SIGTERM to a process.
#[cfg(not(target_os = "windows"))]
pub fn graceful_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| AppError::process(format!("Failed to send SIGTERM to PID {}: {}", pid, e)))
}

#[cfg(target_os = "windows")]
pub fn force_kill(pid: u32) -> Result<()> {
    run_taskkill(pid, true)
}

/// SIGKILL the whole process group, falling back to the single PID.
#[cfg(not(target_os = "windows"))]
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let target = Pid::from_raw(pid as i32);
    match getpgid(Some(target)) {
        // Only signal a group this process leads; never the launcher's own group.
        Ok(pgid) if pgid == target => killpg(pgid, Signal::SIGKILL).map_err(|e| {
            AppError::process(format!(
                "Failed to kill process group {} (from pid {}): {}",
                pgid.as_raw(),
                pid,
                e
            ))
        }),
        _ => kill(target, Signal::SIGKILL)
            .map_err(|e| AppError::process(format!("Failed to kill process {}: {}", pid, e))),
    }
}

#[cfg(target_os = "windows")]
fn run_taskkill(pid: u32, force: bool) -> Result<()> {
    use std::os::windows::process::CommandExt as _;
    use windows::Win32::System::Threading::CREATE_NO_WINDOW;

    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
    if force {
        args.push("/F");
    }

    let output = std::process::Command::new("taskkill")
        .args(&args)
        .creation_flags(CREATE_NO_WINDOW.0)
        .output()
        .map_err(|e| AppError::process(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = match stderr.trim() {
        "" => stdout.trim(),
        detail => detail,
    };
    Err(AppError::process(format!(
        "taskkill failed for pid {}: {}",
        pid,
        if detail.is_empty() { "(no output)" } else { detail }
    )))
}

/// Graceful signal, wait up to `grace` for exit, then force kill.
pub async fn terminate_pid(pid: u32, grace: Duration) {
    if !is_process_alive(pid) {
        return;
    }

    if let Err(e) = graceful_signal(pid) {
        log::warn!("Graceful signal failed for PID {pid}: {e}, force killing");
    } else {
        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if !is_process_alive(pid) {
                return;
            }
            tokio::time::sleep(super::POLL_INTERVAL).await;
        }
        log::warn!(
            "PID {pid} did not exit within {}s, force killing",
            grace.as_secs()
        );
    }

    if is_process_alive(pid) {
        if let Err(e) = force_kill(pid) {
            log::error!("Failed to force kill PID {pid}: {e}");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminate_pid_escalates_past_ignored_sigterm() {
        let mut child = tokio::process::Command::new("/bin/sh")
            .args(["-c", "trap '' TERM; while true; do sleep 1; done"])
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        // Give the shell time to install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        terminate_pid(pid, Duration::from_millis(400)).await;

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(status.code().is_none());
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }
}
