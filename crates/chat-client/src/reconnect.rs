//! Reconnect policy (capped exponential back-off) and the per-session
//! attempt counter with its single-flight guard.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::watch;

/// Controls how the client spaces and limits reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Multiplied by `2^attempt`.
    pub base_delay: Duration,
    /// Maximum delay between attempts (cap).
    pub max_delay: Duration,
    /// Attempts allowed before the session is abandoned.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-indexed): `min(max, base * 2^attempt)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether attempt `attempt` (1-indexed) is past the cap.
    pub fn should_give_up(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

/// Attempt counter plus the "a sequence is running" flag.
///
/// The flag lives in a `watch` channel so senders can wait for a sequence
/// started by someone else to finish.
#[derive(Debug)]
pub(crate) struct ReconnectState {
    attempt: AtomicU32,
    exhausted: AtomicBool,
    in_progress: watch::Sender<bool>,
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self {
            attempt: AtomicU32::new(0),
            exhausted: AtomicBool::new(false),
            in_progress: watch::channel(false).0,
        }
    }
}

impl ReconnectState {
    /// Claim the single reconnect slot.  `None` if a sequence is running.
    pub(crate) fn try_begin(&self) -> Option<ReconnectGuard<'_>> {
        let mut acquired = false;
        self.in_progress.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                acquired = true;
                true
            }
        });
        if acquired {
            Some(ReconnectGuard { state: self })
        } else {
            None
        }
    }

    /// Claim the slot, waiting out any sequence that already holds it.
    pub(crate) async fn begin(&self) -> ReconnectGuard<'_> {
        loop {
            if let Some(guard) = self.try_begin() {
                return guard;
            }
            self.wait_idle().await;
        }
    }

    pub(crate) fn in_progress(&self) -> bool {
        *self.in_progress.borrow()
    }

    /// Resolve once no sequence is running.
    pub(crate) async fn wait_idle(&self) {
        let mut rx = self.in_progress.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Increment and return the attempt number.
    pub(crate) fn next_attempt(&self) -> u32 {
        self.attempt.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    /// Called after any successful send or reconnect.
    pub(crate) fn reset_attempts(&self) {
        self.attempt.store(0, Ordering::SeqCst);
    }

    /// Returns `true` only for the first caller after exhaustion.
    pub(crate) fn mark_exhausted(&self) -> bool {
        !self.exhausted.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    /// Start of a new logical session.
    pub(crate) fn reset(&self) {
        self.attempt.store(0, Ordering::SeqCst);
        self.exhausted.store(false, Ordering::SeqCst);
    }
}

/// Releases the reconnect slot on drop.
pub(crate) struct ReconnectGuard<'a> {
    state: &'a ReconnectState,
}

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        self.state.in_progress.send_replace(false);
    }
}
