//! Single-timer deadline control for a connection.
//!
//! A [`DeadlineController`] runs at most one deadline at a time; arming a new
//! one supersedes whatever was pending. Expiry performs exactly one action:
//! it condemns the socket by cancelling a shared
//! [`CancellationToken`], the signal every I/O phase races against. The
//! controller does not know which logical phase is active; the connection's
//! convention of checking [`fired`][DeadlineController::fired] before
//! inspecting an I/O result is what gives an expiry its meaning.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Arms and cancels the single deadline guarding a connection's phases.
pub struct DeadlineController {
    condemned: CancellationToken,
    timer: Option<JoinHandle<()>>,
}

impl DeadlineController {
    /// Create a controller with no deadline pending.
    #[must_use]
    pub fn new() -> Self {
        Self {
            condemned: CancellationToken::new(),
            timer: None,
        }
    }

    /// Arm the deadline `duration` from now, superseding any pending one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&mut self, duration: Duration) {
        self.cancel();
        let condemned = self.condemned.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            condemned.cancel();
        }));
    }

    /// Stop the pending deadline. No effect if it already fired.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Whether the socket has been condemned.
    ///
    /// Condemnation is sticky: once a deadline fires (or an external close
    /// condemns the connection), every later phase observes it, the same way
    /// a closed socket stays closed.
    #[must_use]
    pub fn fired(&self) -> bool { self.condemned.is_cancelled() }

    /// Clone of the condemnation token, for racing inside a `select!` arm or
    /// handing to an external close handle.
    #[must_use]
    pub fn watch(&self) -> CancellationToken { self.condemned.clone() }
}

impl Default for DeadlineController {
    fn default() -> Self { Self::new() }
}

impl Drop for DeadlineController {
    fn drop(&mut self) { self.cancel(); }
}
