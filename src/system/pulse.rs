//! Pulse Estimator
//!
//! Turns the raw pulse sensor level into a heart rate. A beat is a rising
//! edge above the configured threshold, separated from the previous beat by
//! a refractory period. The most recent plausible beat-to-beat intervals are
//! kept in a small ring and averaged on demand.

use embassy_time::{Duration, Instant};
use heapless::Deque;

use crate::system::config::{NoBeatPolicy, PulseConfig, INTERVAL_MEMORY};

/// Heart rate result of a measurement
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BpmEstimate {
    /// Beats per minute, rounded to one decimal; zero when invalid
    pub value: f64,
    pub valid: bool,
}

impl BpmEstimate {
    pub const fn invalid() -> Self {
        Self {
            value: 0.0,
            valid: false,
        }
    }
}

/// Beat detector and interval averager
pub struct PulseEstimator {
    config: PulseConfig,
    intervals: Deque<Duration, INTERVAL_MEMORY>,
    /// Set while the signal stays above threshold after an accepted edge
    armed: bool,
    last_edge: Option<Instant>,
    /// Last accepted edge, or the start of the measurement
    last_activity: Instant,
}

impl PulseEstimator {
    pub fn new(config: PulseConfig, now: Instant) -> Self {
        Self {
            config,
            intervals: Deque::new(),
            armed: false,
            last_edge: None,
            last_activity: now,
        }
    }

    /// Drops all detector state and history, starting a fresh measurement at `now`
    pub fn restart(&mut self, now: Instant) {
        self.intervals.clear();
        self.armed = false;
        self.last_edge = None;
        self.last_activity = now;
    }

    /// Feeds one raw pulse reading taken at `now`.
    ///
    /// Returns true when the reading was accepted as a beat edge.
    pub fn update(&mut self, raw: u16, now: Instant) -> bool {
        let mut accepted = false;

        if raw > self.config.threshold {
            let past_refractory = match self.last_edge {
                Some(edge) => now.saturating_duration_since(edge) > self.config.min_beat_interval,
                None => true,
            };

            if !self.armed && past_refractory {
                self.armed = true;
                if let Some(edge) = self.last_edge {
                    self.accept_interval(now.saturating_duration_since(edge));
                }
                self.last_edge = Some(now);
                self.last_activity = now;
                accepted = true;
            }
        } else {
            self.armed = false;
        }

        if now.saturating_duration_since(self.last_activity) > self.config.no_beat_timeout {
            debug!("No beat within timeout, resetting edge detection");
            self.armed = false;
            self.last_edge = None;
            if self.config.no_beat_policy == NoBeatPolicy::ClearHistory {
                self.intervals.clear();
            }
            self.last_activity = now;
        }

        accepted
    }

    /// Stores a beat interval if its rate is plausible, evicting the oldest
    /// entry when the ring is full.
    pub fn accept_interval(&mut self, interval: Duration) -> bool {
        let millis = interval.as_millis();
        if millis == 0 {
            return false;
        }

        let bpm = 60_000.0 / millis as f64;
        if bpm < self.config.min_bpm || bpm > self.config.max_bpm {
            debug!("Discarding interval of {} ms ({} bpm)", millis, bpm);
            return false;
        }

        if self.intervals.is_full() {
            self.intervals.pop_front();
        }
        // Cannot fail, a slot was freed above
        let _ = self.intervals.push_back(interval);
        true
    }

    /// Number of intervals currently held
    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    /// Mean rate over the held intervals
    pub fn estimate(&self) -> BpmEstimate {
        let count = self.intervals.len();
        if count == 0 || count < self.config.min_intervals {
            return BpmEstimate::invalid();
        }

        let total: u64 = self.intervals.iter().map(|i| i.as_millis()).sum();
        let mean = total as f64 / count as f64;
        let bpm = 60_000.0 / mean;
        if bpm < self.config.min_bpm || bpm > self.config.max_bpm {
            return BpmEstimate::invalid();
        }

        BpmEstimate {
            value: libm::round(bpm * 10.0) / 10.0,
            valid: true,
        }
    }
}

/// Fixed wall-clock measurement window with a per-second countdown
pub struct MeasurementWindow {
    end: Instant,
    last_reported: Option<u64>,
}

impl MeasurementWindow {
    pub fn new(start: Instant, duration: Duration) -> Self {
        Self {
            end: start + duration,
            last_reported: None,
        }
    }

    pub fn is_open(&self, now: Instant) -> bool {
        now < self.end
    }

    /// Whole seconds left, rounded up. Yields a value only when it changed
    /// since the previous call.
    pub fn countdown(&mut self, now: Instant) -> Option<u64> {
        let remaining = self.end.saturating_duration_since(now).as_millis();
        let secs = remaining.div_ceil(1000);
        if self.last_reported == Some(secs) {
            return None;
        }
        self.last_reported = Some(secs);
        Some(secs)
    }
}
