//! MPU6050 accelerometer driver
//!
//! Just enough of the MPU6050 register map to wake the device and burst-read
//! the accelerometer. The power-on full scale (±2 g) is kept, which gives
//! 16384 LSB per g.

use embedded_hal_async::i2c::I2c;

use crate::system::hardware::{Axes, MotionSensor, SensorFault};

/// I2C address with AD0 tied low
pub const DEFAULT_ADDRESS: u8 = 0x68;

/// Power management 1; the device powers up in sleep mode
const PWR_MGMT_1: u8 = 0x6B;
/// First of six accelerometer output registers (X, Y, Z; high byte first)
const ACCEL_XOUT_H: u8 = 0x3B;

pub struct Mpu6050<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Mpu6050<I> {
    pub fn new(i2c: I) -> Self {
        Self::with_address(i2c, DEFAULT_ADDRESS)
    }

    pub fn with_address(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Clears the sleep bit so conversions start
    pub async fn wake(&mut self) -> Result<(), SensorFault> {
        self.i2c
            .write(self.address, &[PWR_MGMT_1, 0x00])
            .await
            .map_err(|_| SensorFault::Bus)
    }

    /// Reads all three axes in one burst
    pub async fn read_accel(&mut self) -> Result<Axes, SensorFault> {
        let mut raw = [0u8; 6];
        self.i2c
            .write_read(self.address, &[ACCEL_XOUT_H], &mut raw)
            .await
            .map_err(|_| SensorFault::Bus)?;

        Ok(Axes {
            x: i16::from_be_bytes([raw[0], raw[1]]),
            y: i16::from_be_bytes([raw[2], raw[3]]),
            z: i16::from_be_bytes([raw[4], raw[5]]),
        })
    }
}

impl<I: I2c> MotionSensor for Mpu6050<I> {
    async fn read_axes(&mut self) -> Result<Axes, SensorFault> {
        self.read_accel().await
    }
}
