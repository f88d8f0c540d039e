//! Signal sampling
//!
//! One [`SensorSample`] per tick, combining accelerometer magnitude and the
//! raw pulse level. A failed read never interrupts sampling: the affected
//! value is reported as zero, which sits below every detection threshold.

use embassy_time::Instant;

use crate::system::config::ACCEL_LSB_PER_G;
use crate::system::hardware::{AnalogInput, Axes, MotionSensor};

/// Snapshot of both sensors
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorSample {
    /// Acceleration magnitude in g
    pub motion_magnitude: f64,
    /// Pulse sensor ADC counts
    pub pulse_raw: u16,
    pub timestamp: Instant,
}

/// Euclidean norm of the scaled axes, in g
pub fn motion_magnitude(axes: Axes, lsb_per_g: f64) -> f64 {
    let x = f64::from(axes.x) / lsb_per_g;
    let y = f64::from(axes.y) / lsb_per_g;
    let z = f64::from(axes.z) / lsb_per_g;
    libm::sqrt(x * x + y * y + z * z)
}

/// Stream of samples, awaited one at a time
pub trait SampleSource {
    async fn next_sample(&mut self) -> SensorSample;
}

/// Reads the motion and pulse sensors together
pub struct Sampler<M, P> {
    motion: M,
    pulse: P,
    lsb_per_g: f64,
}

impl<M: MotionSensor, P: AnalogInput> Sampler<M, P> {
    pub fn new(motion: M, pulse: P) -> Self {
        Self {
            motion,
            pulse,
            lsb_per_g: ACCEL_LSB_PER_G,
        }
    }

    /// Takes a sample stamped with the current time
    pub async fn sample(&mut self) -> SensorSample {
        self.sample_at(Instant::now()).await
    }

    /// Takes a sample stamped with `timestamp`
    pub async fn sample_at(&mut self, timestamp: Instant) -> SensorSample {
        let motion_magnitude = match self.motion.read_axes().await {
            Ok(axes) => motion_magnitude(axes, self.lsb_per_g),
            Err(fault) => {
                warn!("Motion read failed: {:?}", fault);
                0.0
            }
        };

        let pulse_raw = match self.pulse.read_raw().await {
            Ok(raw) => raw,
            Err(fault) => {
                warn!("Pulse read failed: {:?}", fault);
                0
            }
        };

        SensorSample {
            motion_magnitude,
            pulse_raw,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::hardware::SensorFault;
    use embassy_futures::block_on;

    struct FixedMotion(Result<Axes, SensorFault>);

    impl MotionSensor for FixedMotion {
        async fn read_axes(&mut self) -> Result<Axes, SensorFault> {
            self.0
        }
    }

    struct FixedPulse(Result<u16, SensorFault>);

    impl AnalogInput for FixedPulse {
        async fn read_raw(&mut self) -> Result<u16, SensorFault> {
            self.0
        }
    }

    #[test]
    fn magnitude_is_euclidean_norm_in_g() {
        let axes = Axes {
            x: 16384,
            y: 0,
            z: 0,
        };
        assert!((motion_magnitude(axes, 16384.0) - 1.0).abs() < 1e-9);

        // 3-4-5 triangle scaled to 1 g per 16384 counts
        let axes = Axes {
            x: -3 * 4096,
            y: 4 * 4096,
            z: 0,
        };
        assert!((motion_magnitude(axes, 4096.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn healthy_sensors_produce_a_full_sample() {
        let mut sampler = Sampler::new(
            FixedMotion(Ok(Axes {
                x: 0,
                y: 0,
                z: 16384,
            })),
            FixedPulse(Ok(2048)),
        );
        let sample = block_on(sampler.sample_at(Instant::from_millis(40)));
        assert!((sample.motion_magnitude - 1.0).abs() < 1e-9);
        assert_eq!(sample.pulse_raw, 2048);
        assert_eq!(sample.timestamp, Instant::from_millis(40));
    }

    #[test]
    fn bus_fault_reads_as_zero_motion() {
        let mut sampler = Sampler::new(FixedMotion(Err(SensorFault::Bus)), FixedPulse(Ok(700)));
        let sample = block_on(sampler.sample_at(Instant::from_millis(0)));
        assert_eq!(sample.motion_magnitude, 0.0);
        assert_eq!(sample.pulse_raw, 700);
    }

    #[test]
    fn adc_fault_reads_as_zero_pulse() {
        let mut sampler = Sampler::new(
            FixedMotion(Ok(Axes {
                x: 16384,
                y: 16384,
                z: 0,
            })),
            FixedPulse(Err(SensorFault::Adc)),
        );
        let sample = block_on(sampler.sample_at(Instant::from_millis(0)));
        assert_eq!(sample.pulse_raw, 0);
        assert!(sample.motion_magnitude > 1.4);
    }
}
