//! Running and supervising the leafpress executable.

mod control;
mod poll;
mod port;
mod runner;
mod supervisor;

#[cfg(target_os = "windows")]
pub(crate) mod win_api;

use std::time::Duration;

pub use control::{force_kill, graceful_signal, is_process_alive, terminate_pid};
pub use poll::{PollOutcome, PollSet, PollTask};
pub use port::{is_port_open, pids_on_port};
pub use runner::{CliOutput, ProcessRunner, RunStatus, DEFAULT_COMMAND_TIMEOUT};
pub use supervisor::{
    ServerEvent, ServerState, ServerSupervisor, StartOutcome, StopOutcome, READY_TIMEOUT,
    STOPPED_TIMEOUT,
};

/// Interval between port and liveness checks.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Grace period between a polite termination request and a forced kill.
const KILL_GRACE: Duration = Duration::from_secs(3);
