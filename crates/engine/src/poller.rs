//! Fixed-interval background loop with a single-instance guard.
//!
//! Each engine owns one [`Poller`]. `start` spawns the loop at most once per
//! poller: the running flag is claimed with a compare-and-set, so concurrent
//! starts (startup plus an early inbound command) cannot spawn two loops.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chatwatch_common::error::AppError;

#[derive(Debug)]
pub struct Poller {
    name: &'static str,
    interval: Duration,
    running: AtomicBool,
}

impl Poller {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the background loop unless one is already running.
    ///
    /// Returns `true` if this call spawned the loop. A cycle error is logged
    /// and the loop sleeps the full interval before trying again; nothing
    /// escapes the loop.
    pub fn start<F, Fut>(&self, cycle: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(worker = self.name, "Background loop already running");
            return false;
        }

        let name = self.name;
        let interval = self.interval;
        tracing::info!(
            worker = name,
            interval_secs = interval.as_secs(),
            "Background loop started"
        );

        tokio::spawn(async move {
            loop {
                if let Err(e) = cycle().await {
                    tracing::warn!(worker = name, error = %e, "Cycle failed, retrying after interval");
                }
                tokio::time::sleep(interval).await;
            }
        });
        true
    }
}
