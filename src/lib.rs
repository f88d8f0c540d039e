//! Wearable vitals node core
//!
//! Hardware-independent control logic of the sensor node: signal sampling,
//! pulse estimation, fall detection, the alarm state machine, button
//! debouncing, battery estimation and the MQTT command/telemetry protocol.
//!
//! `system` holds the state machines, codecs and inter-task plumbing; `task`
//! holds the async loops the firmware binary spawns on the embassy executor.
//! Hardware is reached only through `embedded-hal` traits and
//! [`system::hardware::AnalogInput`], so everything here runs on the host
//! under `cargo test`.

#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

// Must come first so the other modules see its macros.
mod fmt;

/// Core system components
pub mod system;
/// Task implementations
pub mod task;
