//! Hardware Resource Management
//!
//! Allocates the Pico 2 W pins and peripherals to the node's tasks and
//! binds them to the capability traits the core logic is written against.
//!
//! # Resource Groups
//! - Motion sensor: MPU6050 on I2C0 (SDA GPIO4, SCL GPIO5)
//! - Pulse sensor: analog output on GPIO26 (ADC0)
//! - Battery: cell voltage through a 1:2 divider on GPIO28 (ADC2)
//! - Vibration motor: PWM on GPIO16 (slice 0, channel A)
//! - Reset button: GPIO17, active low
//! - Emergency button: GPIO18, active low
//! - WiFi: CYW43439 over PIO0 SPI (GPIO23, 24, 25, 29)
//!
//! GPIO29 doubles as the VSYS sense input on a plain Pico, but on the W it
//! clocks the radio, so the battery is measured through GPIO28 instead.
//!
//! # Shared Resources
//! The ADC is shared by the pulse sampler and the battery gauge and protected
//! by a mutex. Each conversion takes the lock only for its own duration.

use assign_resources::assign_resources;
use embassy_rp::adc::{self, Adc, Async as AdcAsync, Channel, InterruptHandler as AdcInterruptHandler};
use embassy_rp::gpio::{Input, Pull};
use embassy_rp::i2c::{self, Async as I2cAsync, I2c, InterruptHandler as I2cInterruptHandler};
use embassy_rp::peripherals::{self, I2C0, PIO0};
use embassy_rp::pio::InterruptHandler as PioInterruptHandler;
use embassy_rp::pwm::{self, Pwm};
use embassy_rp::{bind_interrupts, Peri};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;

use crate::system::config::VIBRATION_PWM_HZ;
use crate::system::hardware::{AnalogInput, SensorFault};
use crate::system::mpu6050::Mpu6050;

/// Global ADC instance protected by a mutex.
static ADC: Mutex<CriticalSectionRawMutex, Option<Adc<'static, AdcAsync>>> = Mutex::new(None);

/// Initializes the ADC peripheral.
///
/// Call once from `main` before spawning any task that reads an analog input.
pub fn init_adc(adc: Peri<'static, peripherals::ADC>) {
    let adc = Adc::new(adc, Irqs, adc::Config::default());
    if let Ok(mut guard) = ADC.try_lock() {
        *guard = Some(adc);
    }
}

/// One ADC channel read through the shared ADC
pub struct AdcInput {
    channel: Channel<'static>,
}

impl AdcInput {
    pub fn new(channel: Channel<'static>) -> Self {
        Self { channel }
    }
}

impl AnalogInput for AdcInput {
    async fn read_raw(&mut self) -> Result<u16, SensorFault> {
        let mut guard = ADC.lock().await;
        let adc = guard.as_mut().ok_or(SensorFault::Adc)?;
        adc.read(&mut self.channel).await.map_err(|_| SensorFault::Adc)
    }
}

/// Accelerometer on its own I2C bus
pub type Accelerometer = Mpu6050<I2c<'static, I2C0, I2cAsync>>;

assign_resources! {
    /// MPU6050 accelerometer on I2C0
    motion_sensor: MotionSensorResources {
        i2c: I2C0,
        sda: PIN_4,
        scl: PIN_5,
    },
    /// Pulse sensor analog output
    pulse_sensor: PulseSensorResources {
        pin: PIN_26,
    },
    /// Battery voltage divider tap
    battery_charge: BatteryChargeResources {
        pin: PIN_28,
    },
    /// Vibration motor driver input
    vibration: VibrationResources {
        slice: PWM_SLICE0,
        pin: PIN_16,
    },
    /// Alarm reset button
    reset_button: ResetButtonResources {
        pin: PIN_17,
    },
    /// Emergency (help) button
    emergency_button: EmergencyButtonResources {
        pin: PIN_18,
    },
    /// CYW43439 WiFi chip
    wifi: WifiResources {
        pwr: PIN_23,
        dio: PIN_24,
        cs: PIN_25,
        clk: PIN_29,
        pio: PIO0,
        dma: DMA_CH0,
    },
}

bind_interrupts!(pub struct Irqs {
    ADC_IRQ_FIFO => AdcInterruptHandler;
    I2C0_IRQ => I2cInterruptHandler<I2C0>;
    PIO0_IRQ_0 => PioInterruptHandler<PIO0>;
});

/// Builds the accelerometer driver; the device still has to be woken
pub fn motion_sensor(r: MotionSensorResources) -> Accelerometer {
    let mut config = i2c::Config::default();
    config.frequency = 400_000;
    Mpu6050::new(I2c::new_async(r.i2c, r.scl, r.sda, Irqs, config))
}

pub fn pulse_input(r: PulseSensorResources) -> AdcInput {
    AdcInput::new(Channel::new_pin(r.pin, Pull::None))
}

pub fn battery_input(r: BatteryChargeResources) -> AdcInput {
    AdcInput::new(Channel::new_pin(r.pin, Pull::None))
}

/// Vibration motor PWM at `VIBRATION_PWM_HZ`, initially off
pub fn vibration_pwm(r: VibrationResources) -> Pwm<'static> {
    let clock_freq_hz = embassy_rp::clocks::clk_sys_freq();

    // Smallest divider that keeps the period within 16 bits
    let divider = ((clock_freq_hz / VIBRATION_PWM_HZ) / 65535 + 1) as u8;
    let period = (clock_freq_hz / (VIBRATION_PWM_HZ * divider as u32)) as u16 - 1;

    let mut config = pwm::Config::default();
    config.divider = divider.into();
    config.top = period;
    config.compare_a = 0;
    Pwm::new_output_a(r.slice, r.pin, config)
}

pub fn reset_button(r: ResetButtonResources) -> Input<'static> {
    Input::new(r.pin, Pull::Up)
}

pub fn emergency_button(r: EmergencyButtonResources) -> Input<'static> {
    Input::new(r.pin, Pull::Up)
}
