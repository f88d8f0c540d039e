//! Async task bodies spawned by the firmware
pub mod emergency_button;
pub mod fall_alarm;
pub mod pulse_measure;
pub mod sensor_read;
pub mod transport;
pub mod vitals_report;
