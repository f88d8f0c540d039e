//! Hardware capability interface
//!
//! The core reaches sensors only through these traits and the `embedded-hal`
//! ones (`InputPin` for buttons, `SetDutyCycle` for the vibration motor,
//! async `I2c` for the accelerometer). The firmware binary binds them to
//! RP2350 peripherals; tests bind them to fakes.

/// Raw failure of a sensor read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorFault {
    /// I2C transfer failed
    Bus,
    /// ADC conversion failed
    Adc,
}

/// Signed raw accelerometer reading, one count per LSB
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Axes {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

/// 3-axis accelerometer
pub trait MotionSensor {
    async fn read_axes(&mut self) -> Result<Axes, SensorFault>;
}

/// Single ADC channel
pub trait AnalogInput {
    /// Reads one conversion in raw counts
    async fn read_raw(&mut self) -> Result<u16, SensorFault>;
}
