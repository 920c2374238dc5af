//! Router-wide "globally rate limited until T" state

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Global pause shared by every dispatcher of one router.
///
/// Concurrent updates keep the furthest deadline, so a short pause
/// reported late never cuts an active longer one.
#[derive(Debug, Default)]
pub struct GlobalRateLimit {
    paused_until: Mutex<Option<Instant>>,
}

impl GlobalRateLimit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause every bucket for `duration` from now; returns the effective deadline
    pub fn pause_for(&self, duration: Duration) -> Instant {
        let candidate = Instant::now() + duration;
        let mut paused_until = self.paused_until.lock();
        let deadline = match *paused_until {
            Some(current) if current > candidate => current,
            _ => candidate,
        };
        *paused_until = Some(deadline);
        deadline
    }

    /// Active deadline, if it is still in the future
    pub fn paused_until(&self) -> Option<Instant> {
        let paused_until = *self.paused_until.lock();
        paused_until.filter(|deadline| *deadline > Instant::now())
    }

    pub fn is_limited(&self) -> bool {
        self.paused_until().is_some()
    }

    /// Resolve once no pause is active, including pauses extended while waiting
    pub async fn wait(&self) {
        while let Some(deadline) = self.paused_until() {
            tracing::debug!(
                wait_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Waiting out global rate limit"
            );
            sleep_until(deadline).await;
        }
    }
}
