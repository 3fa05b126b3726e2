//! Run Control
//!
//! Pause, resume and cancel signals for a running workflow. The executor
//! reads them cooperatively: once per scheduling pass and at every
//! suspension point. An in-flight processor call is never interrupted.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::info;

#[derive(Debug, Default)]
struct ControlFlags {
    paused: bool,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct ControlInner {
    flags: Mutex<ControlFlags>,
    signal: Condvar,
}

/// Cloneable handle shared between the executor and whoever steers the run.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use etlrunner::execution::ExecutionControl;
///
/// let control = ExecutionControl::new();
/// let remote = control.clone();
///
/// remote.cancel();
/// assert!(control.is_cancelled());
/// // Sleeping returns immediately once cancelled.
/// assert!(control.sleep(Duration::from_secs(60)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExecutionControl {
    inner: Arc<ControlInner>,
}

impl ExecutionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a pause before the next scheduling pass.
    pub fn pause(&self) {
        self.flags().paused = true;
        info!("Pause requested");
    }

    pub fn resume(&self) {
        self.flags().paused = false;
        self.inner.signal.notify_all();
        info!("Resume requested");
    }

    /// Requests cancellation. Cannot be undone.
    pub fn cancel(&self) {
        self.flags().cancelled = true;
        self.inner.signal.notify_all();
        info!("Cancellation requested");
    }

    pub fn is_paused(&self) -> bool {
        self.flags().paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags().cancelled
    }

    /// Blocks while paused, re-checking at least every `poll`.
    ///
    /// Returns true if the run was cancelled while waiting.
    pub fn wait_while_paused(&self, poll: Duration) -> bool {
        let mut flags = self.flags();
        while flags.paused && !flags.cancelled {
            let (guard, _) = self
                .inner
                .signal
                .wait_timeout(flags, poll)
                .unwrap_or_else(PoisonError::into_inner);
            flags = guard;
        }
        flags.cancelled
    }

    /// Sleeps for `duration`, waking early on cancellation.
    ///
    /// Returns true if the run was cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut flags = self.flags();
        while !flags.cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .inner
                .signal
                .wait_timeout(flags, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            flags = guard;
        }
        flags.cancelled
    }

    fn flags(&self) -> MutexGuard<'_, ControlFlags> {
        self.inner.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
