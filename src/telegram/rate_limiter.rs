//! Pacing for outgoing Telegram messages.
//!
//! Bots get flood-wait errors when they send too many messages in a burst,
//! which matters for multi-part uploads and broadcasts.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Rate limiter that enforces minimum intervals between operations.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum duration between allowed operations.
    min_interval: Duration,

    /// Earliest time the next operation may start.
    next_allowed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a new rate limiter with the specified minimum interval.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_allowed: Mutex::new(None),
        }
    }

    /// Creates a rate limiter from milliseconds.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// Waits until an operation is allowed, then reserves the next slot.
    ///
    /// Concurrent callers are served one interval apart. Returns the
    /// duration waited.
    pub async fn wait_and_acquire(&self) -> Duration {
        let mut next = self.next_allowed.lock().await;

        let now = Instant::now();
        let wait = next.map_or(Duration::ZERO, |at| at.saturating_duration_since(now));

        if !wait.is_zero() {
            debug!("Rate limiter: waiting {:?} before next send", wait);
            tokio::time::sleep(wait).await;
        }

        *next = Some(Instant::now() + self.min_interval);
        wait
    }

    /// Checks if an operation is currently allowed without blocking.
    #[cfg(test)]
    pub async fn is_allowed(&self) -> bool {
        self.time_until_allowed().await.is_zero()
    }

    /// Returns the time remaining until the next operation is allowed.
    #[cfg(test)]
    pub async fn time_until_allowed(&self) -> Duration {
        let next = self.next_allowed.lock().await;
        next.map_or(Duration::ZERO, |at| at.saturating_duration_since(Instant::now()))
    }

    /// Pushes the next slot out by a flood wait reported by Telegram.
    pub async fn handle_flood_wait(&self, wait: Duration) {
        warn!("Received flood wait from Telegram: {:?}", wait);
        let mut next = self.next_allowed.lock().await;
        let until = Instant::now() + wait;
        if next.is_none_or(|at| at < until) {
            *next = Some(until);
        }
    }
}
