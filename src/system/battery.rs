//! Battery Monitor
//!
//! Estimates the charge of the single-cell LiPo from its voltage.
//!
//! # Voltage reconstruction
//! ```text
//! V_batt = raw / ADC_RANGE * REF_VOLTAGE * DIVIDER_RATIO * scale_factor + offset
//! ```
//! `scale_factor` and `offset` are a linear correction fitted against a
//! multimeter on the actual board.
//!
//! # Charge level
//! - Maps `min_volt..=max_volt` linearly onto 0 %..100 %
//! - Clamps outside that range
//!
//! A reading takes `BATTERY_SAMPLES` conversions and reports their median, so
//! a single noisy or failed conversion does not skew the result.

use moving_median::MovingMedian;

use crate::system::config::{BatteryConfig, BATTERY_SAMPLES};
use crate::system::hardware::AnalogInput;

/// Battery voltage for a raw ADC reading
pub fn voltage_from_raw(raw: u16, config: &BatteryConfig) -> f32 {
    f32::from(raw) / config.adc_range * config.ref_voltage * config.divider_ratio * config.scale_factor
        + config.offset
}

/// Charge percentage for a battery voltage
pub fn percent_from_voltage(voltage: f32, config: &BatteryConfig) -> u8 {
    if voltage <= config.min_volt {
        0
    } else if voltage >= config.max_volt {
        100
    } else {
        let fraction = (voltage - config.min_volt) / (config.max_volt - config.min_volt);
        libm::roundf(fraction * 100.0) as u8
    }
}

/// On-demand battery reader over one ADC channel
pub struct BatteryGauge<A> {
    input: A,
    config: BatteryConfig,
}

impl<A: AnalogInput> BatteryGauge<A> {
    pub fn new(input: A, config: BatteryConfig) -> Self {
        Self { input, config }
    }

    /// Median battery voltage over one burst of conversions
    pub async fn read_voltage(&mut self) -> f32 {
        let mut median_filter = MovingMedian::<f32, BATTERY_SAMPLES>::new();

        for _ in 0..BATTERY_SAMPLES {
            let raw = match self.input.read_raw().await {
                Ok(raw) => raw,
                Err(fault) => {
                    warn!("Battery read failed: {:?}", fault);
                    0
                }
            };
            median_filter.add_value(voltage_from_raw(raw, &self.config));
        }

        median_filter.median()
    }

    /// Current charge level in percent
    pub async fn read_percent(&mut self) -> u8 {
        let voltage = self.read_voltage().await;
        let percent = percent_from_voltage(voltage, &self.config);
        debug!("Battery at {} V, {}%", voltage, percent);
        percent
    }
}
