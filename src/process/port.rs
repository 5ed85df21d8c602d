//! Finding out who, if anyone, listens on the preview port.

use std::time::Duration;

#[cfg(not(target_os = "windows"))]
use std::process::Stdio;

/// Loopback connect attempt budget used when no listener table is available.
const CONNECT_CHECK_TIMEOUT: Duration = Duration::from_millis(300);

/// Whether something is listening on `port`.
pub async fn is_port_open(port: u16) -> bool {
    match listener_pids(port).await {
        Some(pids) if !pids.is_empty() => true,
        // lsof hides other users' sockets; confirm with a loopback connect.
        _ => connect_check(port).await,
    }
}

/// PIDs holding a listening socket on `port`. Empty when unknown.
pub async fn pids_on_port(port: u16) -> Vec<u32> {
    listener_pids(port).await.unwrap_or_default()
}

async fn connect_check(port: u16) -> bool {
    matches!(
        tokio::time::timeout(
            CONNECT_CHECK_TIMEOUT,
            tokio::net::TcpStream::connect(("127.0.0.1", port)),
        )
        .await,
        Ok(Ok(_))
    )
}

/// `None` when the listener table could not be read at all.
#[cfg(not(target_os = "windows"))]
async fn listener_pids(port: u16) -> Option<Vec<u32>> {
    let output = tokio::process::Command::new("lsof")
        .args(["-nP", &format!("-iTCP:{port}"), "-sTCP:LISTEN", "-t"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;

    match output {
        // lsof exits 1 when nothing matches.
        Ok(output) => Some(parse_pid_lines(&String::from_utf8_lossy(&output.stdout))),
        Err(e) => {
            log::debug!("lsof unavailable ({}), falling back to a loopback connect", e);
            None
        }
    }
}

#[cfg(target_os = "windows")]
async fn listener_pids(port: u16) -> Option<Vec<u32>> {
    tokio::task::spawn_blocking(move || super::win_api::listening_pids(port))
        .await
        .ok()
}

fn parse_pid_lines(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}
