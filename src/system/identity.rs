//! Device identity
//!
//! Every outbound frame carries the node's identity and every inbound control
//! frame names the node it is meant for.

use core::fmt;

use crate::system::config::DEVICE_ID;

/// Immutable token identifying this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceIdentity(&'static str);

impl DeviceIdentity {
    pub const fn new(id: &'static str) -> Self {
        Self(id)
    }

    /// Identity configured for this build
    pub const fn configured() -> Self {
        Self(DEVICE_ID)
    }

    pub const fn as_str(&self) -> &'static str {
        self.0
    }

    /// True if a frame addressed to `target` is meant for this node
    pub fn matches(&self, target: &str) -> bool {
        self.0 == target
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}
