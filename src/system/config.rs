//! Node Configuration
//!
//! Compile-time constants for timing, signal thresholds, battery calibration
//! and the broker link. Deployment values (WiFi and broker credentials, the
//! device identity) can be overridden at build time through environment
//! variables:
//!
//! ```text
//! WIFI_NETWORK=... WIFI_PASSWORD=... MQTT_USER=... MQTT_PASSWORD=... \
//! DEVICE_ID=010101-1111 cargo build --release --features rp
//! ```
//!
//! Behaviour that tests need to vary is grouped in small `Copy` structs with a
//! `const` default instance.

use embassy_time::Duration;

/// Resolves a build-time override or falls back to a default.
macro_rules! env_or {
    ($name:literal, $default:expr) => {
        match option_env!($name) {
            Some(value) => value,
            None => $default,
        }
    };
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Token identifying this node in every frame
pub const DEVICE_ID: &str = env_or!("DEVICE_ID", "010101-1111");

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// Sampler tick; also the yield interval of a pulse measurement
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Accelerometer sensitivity at ±2 g full scale (LSB per g)
pub const ACCEL_LSB_PER_G: f64 = 16384.0;

// ---------------------------------------------------------------------------
// Pulse estimation
// ---------------------------------------------------------------------------

/// Number of beat intervals kept for averaging
pub const INTERVAL_MEMORY: usize = 5;

/// Length of an on-demand pulse measurement
pub const MEASUREMENT_WINDOW: Duration = Duration::from_secs(30);

/// What the no-beat timeout does to the interval history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NoBeatPolicy {
    /// Only edge detection restarts; averaging continues across short gaps
    KeepHistory,
    /// Edge detection restarts and buffered intervals are dropped
    ClearHistory,
}

/// Beat detector tuning
#[derive(Debug, Clone, Copy)]
pub struct PulseConfig {
    /// Raw ADC level a beat edge must exceed (12-bit counts)
    pub threshold: u16,
    /// Refractory period after an accepted edge
    pub min_beat_interval: Duration,
    /// Silence after which edge detection starts over
    pub no_beat_timeout: Duration,
    /// Lowest plausible rate
    pub min_bpm: f64,
    /// Highest plausible rate
    pub max_bpm: f64,
    /// Intervals required before an estimate is valid
    pub min_intervals: usize,
    /// Effect of the no-beat timeout on buffered intervals
    pub no_beat_policy: NoBeatPolicy,
}

impl PulseConfig {
    pub const DEFAULT: Self = Self {
        threshold: 600,
        min_beat_interval: Duration::from_millis(300),
        no_beat_timeout: Duration::from_millis(5000),
        min_bpm: 40.0,
        max_bpm: 180.0,
        min_intervals: 3,
        no_beat_policy: NoBeatPolicy::KeepHistory,
    };
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// ---------------------------------------------------------------------------
// Fall detection and alarm
// ---------------------------------------------------------------------------

/// Acceleration magnitude (g) treated as a fall impact
pub const ACCEL_THRESHOLD: f64 = 2.5;

/// Time the wearer has to cancel an alarm before it is reported
pub const FALL_CONFIRM_WINDOW: Duration = Duration::from_secs(30);

/// Vibration motor PWM frequency
pub const VIBRATION_PWM_HZ: u32 = 1_000;

// ---------------------------------------------------------------------------
// Buttons
// ---------------------------------------------------------------------------

/// Minimum spacing between two accepted emergency presses
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(200);

/// Emergency button poll period (well below the debounce interval)
pub const BUTTON_POLL_INTERVAL: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// Battery
// ---------------------------------------------------------------------------

/// Readings taken per on-demand battery measurement (median filtered)
pub const BATTERY_SAMPLES: usize = 9;

/// Battery voltage reconstruction and charge mapping
#[derive(Debug, Clone, Copy)]
pub struct BatteryConfig {
    /// ADC reference voltage
    pub ref_voltage: f32,
    /// ADC full scale (12-bit)
    pub adc_range: f32,
    /// Resistor divider ratio in front of the ADC pin
    pub divider_ratio: f32,
    /// Fitted gain correction
    pub scale_factor: f32,
    /// Fitted offset correction (volts)
    pub offset: f32,
    /// Voltage reported as 0 %
    pub min_volt: f32,
    /// Voltage reported as 100 %
    pub max_volt: f32,
}

impl BatteryConfig {
    /// Single-cell LiPo behind a 1:2 divider
    pub const DEFAULT: Self = Self {
        ref_voltage: 3.3,
        adc_range: 4096.0,
        divider_ratio: 2.0,
        scale_factor: 1.0,
        offset: 0.0,
        min_volt: 3.3,
        max_volt: 4.2,
    };
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

pub const WIFI_NETWORK: &str = env_or!("WIFI_NETWORK", "vitals");
pub const WIFI_PASSWORD: &str = env_or!("WIFI_PASSWORD", "");

/// Broker address on the care-home network
pub const MQTT_BROKER: [u8; 4] = [192, 168, 1, 106];
pub const MQTT_PORT: u16 = 1883;
pub const MQTT_USER: &str = env_or!("MQTT_USER", "user2");
pub const MQTT_PASSWORD: &str = env_or!("MQTT_PASSWORD", "");

/// Topic carrying outbound telemetry frames
pub const TOPIC_DATA: &str = "sundhed/data";
/// Topic carrying inbound control frames
pub const TOPIC_CONTROL: &str = "sundhed/control";

/// MQTT keep-alive announced in CONNECT
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Fixed delay between connection attempts
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How long to wait for CONNACK or SUBACK before giving up on an attempt
pub const BROKER_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
