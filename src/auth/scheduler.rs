//! Refresh timer
//!
//! The token manager re-arms a one-shot timer after every successful
//! exchange or refresh. When it fires, the scheduler only signals; the
//! owner of the receiving end decides how to run the refresh.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub trait RefreshScheduler: Send + Sync {
    /// Replace any pending refresh with one due after `delay`.
    fn schedule_next_refresh(&self, delay: Duration);

    fn cancel_scheduled_refresh(&self);
}

/// Tokio-backed one-shot timer. Fires by sending `()` on its channel.
pub struct TimerScheduler {
    trigger: mpsc::UnboundedSender<()>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl TimerScheduler {
    /// Create the scheduler and the receiver that observes its firings.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (trigger, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            trigger,
            pending: Mutex::new(None),
        };
        (scheduler, rx)
    }
}

impl RefreshScheduler for TimerScheduler {
    fn schedule_next_refresh(&self, delay: Duration) {
        let trigger = self.trigger.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::debug!("Refresh timer fired");
            if trigger.send(()).is_err() {
                tracing::warn!("Refresh timer fired with no listener");
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
    }

    fn cancel_scheduled_refresh(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.take() {
            previous.abort();
            tracing::debug!("Scheduled refresh cancelled");
        }
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.cancel_scheduled_refresh();
    }
}

/// For one-shot commands: nothing stays alive to run a timer.
#[derive(Debug, Default)]
pub struct NoopScheduler;

impl RefreshScheduler for NoopScheduler {
    fn schedule_next_refresh(&self, delay: Duration) {
        tracing::debug!(
            "Next refresh due in {}s (run 'isolar-cli serve' to refresh automatically)",
            delay.as_secs()
        );
    }

    fn cancel_scheduled_refresh(&self) {}
}

#[cfg(test)]
pub use recording::{Scheduled, RecordingScheduler};
