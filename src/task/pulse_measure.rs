//! On-demand pulse measurement
//!
//! Runs the beat detector over the sample stream for a fixed wall-clock
//! window. Every sample is awaited, so the measurement yields to the other
//! tasks once per sampling interval for its whole duration.

use embassy_time::{Duration, Instant};

use crate::system::pulse::{BpmEstimate, MeasurementWindow, PulseEstimator};
use crate::system::sample::SampleSource;

/// Measures for `duration` starting at `start`.
///
/// The estimator is restarted first, so the result only reflects beats seen
/// inside this window.
pub async fn measure<S: SampleSource>(
    estimator: &mut PulseEstimator,
    samples: &mut S,
    start: Instant,
    duration: Duration,
) -> BpmEstimate {
    estimator.restart(start);
    let mut window = MeasurementWindow::new(start, duration);
    info!("Measuring pulse for {} s", duration.as_secs());

    loop {
        let sample = samples.next_sample().await;
        if !window.is_open(sample.timestamp) {
            break;
        }
        // Samples queued before the request are not part of the window
        if sample.timestamp < start {
            continue;
        }

        estimator.update(sample.pulse_raw, sample.timestamp);
        if let Some(remaining) = window.countdown(sample.timestamp) {
            debug!("Pulse measurement: {} s left", remaining);
        }
    }

    let estimate = estimator.estimate();
    info!(
        "Pulse measurement done: {} bpm (valid: {}, {} intervals)",
        estimate.value,
        estimate.valid,
        estimator.interval_count()
    );
    estimate
}
