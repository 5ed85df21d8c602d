//! Cancellable "poll until" operations.
//!
//! Every poll is registered with the [`PollSet`] that created it, so tearing the
//! owner down can abort all outstanding polls at once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Satisfied,
    /// The predicate never held. Callers must re-check the real state.
    TimedOut,
    Cancelled,
}

/// A running poll. Await it for the outcome, or call [`PollTask::cancel`].
pub struct PollTask {
    handle: JoinHandle<bool>,
}

impl PollTask {
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Future for PollTask {
    type Output = PollOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(true) => PollOutcome::Satisfied,
            Ok(false) => PollOutcome::TimedOut,
            Err(e) => {
                if e.is_panic() {
                    log::error!("Poll task panicked: {}", e);
                }
                PollOutcome::Cancelled
            }
        })
    }
}

pub struct PollSet {
    interval: Duration,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl PollSet {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Evaluate `predicate` every interval until it returns true or `timeout` elapses.
    pub fn wait_until<F, Fut>(&self, mut predicate: F, timeout: Duration) -> PollTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let deadline = Instant::now() + timeout;
            loop {
                if predicate().await {
                    return true;
                }
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                tokio::time::sleep(interval.min(deadline - now)).await;
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle.abort_handle());
        drop(tasks);

        PollTask { handle }
    }

    /// Abort every outstanding poll; their tasks resolve to [`PollOutcome::Cancelled`].
    pub fn cancel_all(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let count = tasks.iter().filter(|task| !task.is_finished()).count();
        for task in tasks.drain(..) {
            task.abort();
        }
        if count > 0 {
            log::debug!("Cancelled {} outstanding poll(s)", count);
        }
    }

    pub fn outstanding(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.iter().filter(|task| !task.is_finished()).count()
    }
}

impl Drop for PollSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
