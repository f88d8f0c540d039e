//! Press debouncing
//!
//! A press counts only if the debounce interval has passed since the last
//! accepted press. The reference point is the accepted press rather than the
//! previous poll, so a held contact or a burst of bounces produces at most one
//! press per interval.

use embassy_time::{Duration, Instant};

use crate::system::config::DEBOUNCE_INTERVAL;

pub struct Debouncer {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    /// Feeds the current contact state; true when a press is accepted
    pub fn accept(&mut self, pressed: bool, now: Instant) -> bool {
        if !pressed {
            return false;
        }

        match self.last_accepted {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_accepted = Some(now);
                true
            }
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_INTERVAL)
    }
}
