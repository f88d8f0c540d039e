//! Fall Monitor
//!
//! Edge-triggered threshold classifier over the motion magnitude. A fall is
//! signalled on the sample that starts an excursion above the threshold, and
//! only while the alarm is idle, so an ongoing alarm is never re-triggered.

use crate::system::alarm::AlarmState;
use crate::system::config::ACCEL_THRESHOLD;
use crate::system::sample::SensorSample;

pub struct FallMonitor {
    threshold: f64,
    in_excursion: bool,
}

impl FallMonitor {
    pub const fn new(threshold: f64) -> Self {
        Self {
            threshold,
            in_excursion: false,
        }
    }

    /// Returns true if `sample` should raise the alarm
    pub fn classify(&mut self, sample: &SensorSample, alarm: AlarmState) -> bool {
        let above = sample.motion_magnitude > self.threshold;
        let rising = above && !self.in_excursion;
        self.in_excursion = above;

        if rising {
            debug!("Motion excursion: {} g", sample.motion_magnitude);
        }
        rising && alarm == AlarmState::Idle
    }
}

impl Default for FallMonitor {
    fn default() -> Self {
        Self::new(ACCEL_THRESHOLD)
    }
}
