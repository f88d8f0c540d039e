//! Command/telemetry frames
//!
//! Frames are colon-delimited ASCII.
//!
//! Outbound (data topic):
//! ```text
//! PULS:<id>:<bpm>     bpm with one decimal, 0.0 when no valid estimate
//! FALD:<id>           confirmed fall
//! HELP:<id>           emergency button
//! BAT:<id>:<pct>      battery charge, integer percent
//! ```
//!
//! Inbound (control topic):
//! ```text
//! send_update:<id>    report battery, then measure and report pulse
//! reset:<id>          cancel a pending fall alarm
//! ```
//! Control frames for another id, or that do not parse, are dropped.

use core::fmt::Write;

use heapless::String;

use crate::system::identity::DeviceIdentity;
use crate::system::pulse::BpmEstimate;

/// Longest outbound frame
pub const MAX_FRAME_LEN: usize = 64;

pub type Frame = String<MAX_FRAME_LEN>;

/// Everything the node ever puts on the data topic
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryMessage {
    Pulse { id: DeviceIdentity, bpm: BpmEstimate },
    Fall { id: DeviceIdentity },
    Help { id: DeviceIdentity },
    Battery { id: DeviceIdentity, percent: u8 },
}

impl TelemetryMessage {
    /// Renders the wire frame
    pub fn encode(&self) -> Result<Frame, FrameError> {
        let mut frame = Frame::new();
        let written = match self {
            Self::Pulse { id, bpm } => {
                let value = if bpm.valid { bpm.value } else { 0.0 };
                write!(frame, "PULS:{}:{:.1}", id, value)
            }
            Self::Fall { id } => write!(frame, "FALD:{}", id),
            Self::Help { id } => write!(frame, "HELP:{}", id),
            Self::Battery { id, percent } => write!(frame, "BAT:{}:{}", id, percent),
        };
        written.map_err(|_| FrameError::TooLong)?;
        Ok(frame)
    }
}

/// Why a control frame was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    NotUtf8,
    MissingSeparator,
    UnknownCommand,
    ForeignDevice,
    TooLong,
}

/// Decoded control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand<'a> {
    SendUpdate { target_id: &'a str },
    Reset { target_id: &'a str },
}

impl<'a> ControlCommand<'a> {
    pub fn parse(frame: &'a str) -> Result<Self, FrameError> {
        let (command, target_id) = frame.trim().split_once(':').ok_or(FrameError::MissingSeparator)?;
        match command {
            "send_update" => Ok(Self::SendUpdate { target_id }),
            "reset" => Ok(Self::Reset { target_id }),
            _ => Err(FrameError::UnknownCommand),
        }
    }

    pub fn target_id(&self) -> &'a str {
        match self {
            Self::SendUpdate { target_id } | Self::Reset { target_id } => target_id,
        }
    }
}

/// Control request addressed to this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    SendUpdate,
    Reset,
}

/// Parses a control payload and keeps it only if it names `identity`
pub fn accept_control(payload: &[u8], identity: DeviceIdentity) -> Result<Request, FrameError> {
    let frame = core::str::from_utf8(payload).map_err(|_| FrameError::NotUtf8)?;
    let command = ControlCommand::parse(frame)?;
    if !identity.matches(command.target_id()) {
        return Err(FrameError::ForeignDevice);
    }

    Ok(match command {
        ControlCommand::SendUpdate { .. } => Request::SendUpdate,
        ControlCommand::Reset { .. } => Request::Reset,
    })
}
