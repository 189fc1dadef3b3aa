//! Cancellable deadlines
//!
//! A [`Deadline`] runs a callback once after a delay unless it is cancelled
//! first. It is backed by tokio's timer, so tests can pause the clock and
//! advance virtual time instead of waiting.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Armed one-shot timer; dropping it cancels the callback
#[derive(Debug)]
pub struct Deadline {
    handle: Option<JoinHandle<()>>,
}

impl Deadline {
    /// Arm a timer that awaits `on_elapsed` after `duration`
    ///
    /// The deadline is fixed at the moment of arming. Must be called from
    /// within a tokio runtime.
    pub fn arm<F>(duration: Duration, on_elapsed: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = tokio::time::Instant::now() + duration;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_elapsed.await;
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Whether the timer is still waiting to fire
    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Release the timer without aborting it
    ///
    /// Used from inside the callback itself, where aborting would cancel the
    /// running cleanup.
    pub fn detach(mut self) {
        self.handle.take();
    }

    /// Cancel the timer; a no-op if it already fired
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.cancel();
    }
}
