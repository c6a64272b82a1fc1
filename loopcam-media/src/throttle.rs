//! Minimum-interval gate for position changes

use std::time::Duration;
use tokio::time::Instant;

/// Admits at most one event per window
///
/// The first event always passes; later events pass only when at least
/// `window` has elapsed since the last admitted one. Rejected events do
/// not move the window.
#[derive(Debug, Clone)]
pub struct SeekThrottle {
    window: Duration,
    last: Option<Instant>,
}

impl SeekThrottle {
    /// Create a throttle
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Try to admit an event at `now`
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Forget the last admitted event
    pub fn reset(&mut self) {
        self.last = None;
    }
}
