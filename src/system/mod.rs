//! Core system components for the vitals node
pub mod alarm;
pub mod battery;
pub mod config;
pub mod debounce;
pub mod event;
pub mod fall;
pub mod hardware;
pub mod identity;
pub mod mpu6050;
pub mod protocol;
pub mod pulse;
#[cfg(feature = "rp")]
pub mod resources;
pub mod sample;
